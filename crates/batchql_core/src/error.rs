//! Errors raised while reading and decomposing relation predicates.

use crate::span::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Predicate text could not be parsed.
#[derive(Error, Diagnostic, Debug, Clone)]
#[error("{message}")]
#[diagnostic(code(batchql::syntax))]
pub struct SyntaxError {
    pub message: String,
    #[source_code]
    pub source_code: String,
    #[label("here")]
    pub location: SourceSpan,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, source: &str, span: Span) -> Self {
        Self {
            message: message.into(),
            source_code: source.to_string(),
            location: span.into(),
            span,
        }
    }
}

/// Why a predicate does not decompose into a key anchor plus child filters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeViolation {
    #[error("has no equality between a parent accessor and a child accessor")]
    MissingAnchor,

    #[error("has {0} equalities between parent and child accessors, expected exactly one")]
    AmbiguousAnchor(usize),

    #[error("filters on the parent parameter in `{0}`; only the child side may be filtered")]
    ParentResidual(String),
}

/// A relation predicate was rejected by the key extractor.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("relation predicate `{predicate}` {violation}")]
#[diagnostic(code(batchql::relation_shape))]
pub struct RelationShapeError {
    /// The offending predicate, rendered.
    pub predicate: String,
    pub violation: ShapeViolation,
}

/// Errors from [`crate::relation::Relation::parse`].
#[derive(Error, Diagnostic, Debug, Clone)]
pub enum RelationError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Shape(#[from] RelationShapeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_message() {
        let err = RelationShapeError {
            predicate: "(p, c) => c.key == p.fk && p.extra > 0".to_string(),
            violation: ShapeViolation::ParentResidual("p.extra > 0".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "relation predicate `(p, c) => c.key == p.fk && p.extra > 0` filters on the parent \
             parameter in `p.extra > 0`; only the child side may be filtered"
        );
    }

    #[test]
    fn test_syntax_error_location() {
        let err = SyntaxError::new("unexpected `)`", "(p, c) => )", Span::new(10, 11));
        assert_eq!(err.location.offset(), 10);
        assert_eq!(err.location.len(), 1);
        assert_eq!(err.to_string(), "unexpected `)`");
    }
}
