//! Error types for batch resolution and pagination.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned by user-supplied batch functions and ordered sources.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// A batch plan failed. Cloned to every consumer waiting on the plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The batch function returned an error.
    #[error("batch function `{loader}` failed: {message}")]
    Failed { loader: Arc<str>, message: Arc<str> },

    /// One invocation exceeded the configured batch timeout.
    #[error("batch function `{loader}` timed out after {after:?}")]
    Timeout { loader: Arc<str>, after: Duration },

    /// The session was cancelled or torn down before the plan completed.
    #[error("resolution session was cancelled")]
    Cancelled,

    /// The session-wide deadline elapsed; the session has been cancelled.
    #[error("resolution session exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl BatchError {
    pub fn failed(loader: &str, message: impl std::fmt::Display) -> Self {
        Self::Failed {
            loader: Arc::from(loader),
            message: Arc::from(message.to_string()),
        }
    }

    /// True when the failure came from cancellation rather than the function.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }
}

/// Invalid `first` / `last` arguments.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationArgumentError {
    #[error("`first` must be non-negative, got {0}")]
    NegativeFirst(i64),

    #[error("`last` must be non-negative, got {0}")]
    NegativeLast(i64),

    #[error("`first` and `last` cannot be supplied together")]
    FirstAndLast,
}

/// Pagination over an [`crate::pagination::OrderedSource`] failed.
#[derive(Error, Debug)]
pub enum PaginationError {
    #[error(transparent)]
    Argument(#[from] PaginationArgumentError),

    #[error("ordered source failed: {0}")]
    Source(LoadError),
}
