//! Runtime for batchql.
//!
//! This crate provides deferred batched field resolution and pagination:
//! - `loader`: batch function shapes and their normalization
//! - `plan`: per-function batch plans and their lifecycle
//! - `session`: the resolution session, deferred values, cancellation
//! - `union`: ordered concatenation of several contributions
//! - `relation`: loaders built from relation predicates
//! - `pagination`: cursor windows, connections, ordered sources
//! - `context`: typed request context
//! - `config`: session configuration

pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod pagination;
pub mod plan;
pub mod relation;
pub mod session;
pub mod union;

pub use config::SessionConfig;
pub use context::{ContextExt, ContextId, SharedContext, TypedContext};
pub use error::{BatchError, LoadError, PaginationArgumentError, PaginationError};
pub use loader::{BatchFn, BatchKey, BatchValue, LoadResult, Loader, LoaderId};
pub use pagination::{
    paginate, Connection, ConnectionOptions, Edge, OrderedSource, PageArgs, PageInfo, PageWindow,
};
pub use plan::{PlanKey, PlanState};
pub use relation::RelationLoader;
pub use session::{Deferred, ResolutionSession, SessionStats};
pub use union::{
    BatchContribution, ChainContribution, Contribution, DirectContribution, Tagged, UnionField,
};
