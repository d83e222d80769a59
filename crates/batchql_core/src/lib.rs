//! Core types for batchql.
//!
//! This crate holds everything needed to turn a relation predicate into
//! batching keys:
//! - `expr`: the predicate expression algebra
//! - `lexer` / `parser`: predicate text syntax
//! - `eval`: keys and evaluation against JSON entities
//! - `relation`: key extraction (anchor equality + child residual)
//! - `span`, `error`: source locations and diagnostics

pub mod error;
pub mod eval;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod relation;
pub mod span;

pub use error::{RelationError, RelationShapeError, ShapeViolation, SyntaxError};
pub use eval::{Key, Scope};
pub use expr::{BinaryOp, Expr, Literal, Predicate, ScalarType, Side, TypeRef};
pub use parser::parse_predicate;
pub use relation::{KeySelector, Relation, Residual};
pub use span::Span;
