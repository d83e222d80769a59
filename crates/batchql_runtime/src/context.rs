//! Ambient evaluation context threaded through batch invocations.
//!
//! Uses `TypeId` for type-safe lookup instead of string keys. Each context
//! carries an identity; batch functions that require a context are
//! deduplicated per (function, context identity).

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`TypedContext`] for plan deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

/// Request-scoped values keyed by type.
///
/// # Example
///
/// ```
/// use batchql_runtime::context::{ContextExt, TypedContext};
///
/// #[derive(Clone)]
/// struct CallerId(String);
///
/// let ctx = TypedContext::new().with(CallerId("u-1".into()));
/// assert_eq!(ctx.get::<CallerId>().map(|c| c.0.as_str()), Some("u-1"));
/// assert!(ctx.get::<u32>().is_none());
/// ```
pub struct TypedContext {
    id: ContextId,
    data: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for TypedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TypedContext {
    /// Creates a new empty context with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            data: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.data
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast().ok().map(|b| *b))
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.data
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok().map(|b| *b))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Freezes the context for sharing with a session.
    pub fn shared(self) -> SharedContext {
        Arc::new(self)
    }
}

impl fmt::Debug for TypedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedContext")
            .field("id", &self.id)
            .field("data_count", &self.data.len())
            .finish()
    }
}

/// A shareable, thread-safe context.
pub type SharedContext = Arc<TypedContext>;

/// Fluent construction.
pub trait ContextExt {
    fn with<T: Send + Sync + 'static>(self, value: T) -> Self;
}

impl ContextExt for TypedContext {
    fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct CallerId(&'static str);

    #[test]
    fn test_typed_context_replace_and_remove() {
        let mut ctx = TypedContext::new();
        assert!(ctx.insert(CallerId("old")).is_none());
        assert_eq!(ctx.insert(CallerId("new")), Some(CallerId("old")));
        assert_eq!(ctx.get::<CallerId>(), Some(&CallerId("new")));
        assert_eq!(ctx.remove::<CallerId>(), Some(CallerId("new")));
        assert!(!ctx.contains::<CallerId>());
    }

    #[test]
    fn test_context_identity_is_unique() {
        let a = TypedContext::new();
        let b = TypedContext::new().with(CallerId("x"));
        assert_ne!(a.id(), b.id());
    }
}
