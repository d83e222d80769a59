//! Batch functions.
//!
//! A batch function maps a set of keys to per-key results. Callers pick one
//! of the [`BatchFn`] shapes at registration time; every shape is normalized
//! into a single async `(context, keys) -> map` call held by a [`Loader`].

use crate::context::{SharedContext, TypedContext};
use crate::error::LoadError;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Keys usable in a batch plan.
pub trait BatchKey: Eq + Hash + Clone + Send + Sync + 'static {}
impl<T: Eq + Hash + Clone + Send + Sync + 'static> BatchKey for T {}

/// Results usable in a batch plan.
pub trait BatchValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> BatchValue for T {}

/// What a batch function returns. Keys absent from the map have no value.
pub type LoadResult<K, R> = Result<HashMap<K, R>, LoadError>;

type SyncFn<K, R> = Arc<dyn Fn(&[K]) -> LoadResult<K, R> + Send + Sync>;
type SyncCtxFn<K, R> = Arc<dyn Fn(&TypedContext, &[K]) -> LoadResult<K, R> + Send + Sync>;
type AsyncFn<K, R> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, LoadResult<K, R>> + Send + Sync>;
type AsyncCtxFn<K, R> =
    Arc<dyn Fn(SharedContext, Vec<K>) -> BoxFuture<'static, LoadResult<K, R>> + Send + Sync>;
type CanonicalFn<K, R> =
    Arc<dyn Fn(SharedContext, Vec<K>) -> BoxFuture<'static, LoadResult<K, R>> + Send + Sync>;

/// The closed set of batch function shapes.
pub enum BatchFn<K, R> {
    Sync(SyncFn<K, R>),
    SyncWithContext(SyncCtxFn<K, R>),
    Async(AsyncFn<K, R>),
    AsyncWithContext(AsyncCtxFn<K, R>),
}

impl<K, R> BatchFn<K, R> {
    /// Whether the function reads the ambient context.
    pub fn needs_context(&self) -> bool {
        matches!(self, Self::SyncWithContext(_) | Self::AsyncWithContext(_))
    }
}

impl<K: BatchKey, R: BatchValue> BatchFn<K, R> {
    fn normalize(self) -> CanonicalFn<K, R> {
        match self {
            Self::Sync(f) => Arc::new(
                move |_ctx: SharedContext, keys: Vec<K>| -> BoxFuture<'static, LoadResult<K, R>> {
                    let result = f(keys.as_slice());
                    Box::pin(async move { result })
                },
            ),
            Self::SyncWithContext(f) => Arc::new(
                move |ctx: SharedContext, keys: Vec<K>| -> BoxFuture<'static, LoadResult<K, R>> {
                    let result = f(ctx.as_ref(), keys.as_slice());
                    Box::pin(async move { result })
                },
            ),
            Self::Async(f) => Arc::new(move |_ctx: SharedContext, keys: Vec<K>| f(keys)),
            Self::AsyncWithContext(f) => f,
        }
    }
}

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one batch function registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u64);

/// A registered batch function.
///
/// Each construction gets a fresh [`LoaderId`]; clones share it. Two loaders
/// built from the same closure are still deduplicated separately.
pub struct Loader<K, R> {
    id: LoaderId,
    name: Arc<str>,
    needs_context: bool,
    call: CanonicalFn<K, R>,
}

impl<K, R> Clone for Loader<K, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            needs_context: self.needs_context,
            call: Arc::clone(&self.call),
        }
    }
}

impl<K, R> fmt::Debug for Loader<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("needs_context", &self.needs_context)
            .finish()
    }
}

impl<K: BatchKey, R: BatchValue> Loader<K, R> {
    /// Registers a batch function of any shape.
    pub fn from_batch_fn(name: impl Into<Arc<str>>, batch_fn: BatchFn<K, R>) -> Self {
        Self {
            id: LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            needs_context: batch_fn.needs_context(),
            call: batch_fn.normalize(),
        }
    }

    /// A synchronous batch function.
    pub fn new<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&[K]) -> LoadResult<K, R> + Send + Sync + 'static,
    {
        Self::from_batch_fn(name, BatchFn::Sync(Arc::new(f)))
    }

    /// A synchronous batch function reading the ambient context.
    pub fn with_context<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&TypedContext, &[K]) -> LoadResult<K, R> + Send + Sync + 'static,
    {
        Self::from_batch_fn(name, BatchFn::SyncWithContext(Arc::new(f)))
    }

    /// An asynchronous batch function.
    pub fn from_async<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoadResult<K, R>> + Send + 'static,
    {
        Self::from_batch_fn(
            name,
            BatchFn::Async(Arc::new(
                move |keys: Vec<K>| -> BoxFuture<'static, LoadResult<K, R>> { Box::pin(f(keys)) },
            )),
        )
    }

    /// An asynchronous batch function reading the ambient context.
    pub fn from_async_with_context<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(SharedContext, Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoadResult<K, R>> + Send + 'static,
    {
        Self::from_batch_fn(
            name,
            BatchFn::AsyncWithContext(Arc::new(
                move |ctx: SharedContext, keys: Vec<K>| -> BoxFuture<'static, LoadResult<K, R>> {
                    Box::pin(f(ctx, keys))
                },
            )),
        )
    }

    pub fn id(&self) -> LoaderId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn needs_context(&self) -> bool {
        self.needs_context
    }

    /// Invokes the function once for `keys`.
    pub(crate) fn invoke(
        &self,
        ctx: SharedContext,
        keys: Vec<K>,
    ) -> BoxFuture<'static, LoadResult<K, R>> {
        (self.call)(ctx, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextExt;

    #[derive(Clone)]
    struct Tenant(&'static str);

    #[tokio::test]
    async fn test_sync_loader() {
        let loader = Loader::new("double", |keys: &[i32]| {
            Ok(keys.iter().map(|k| (*k, k * 2)).collect())
        });
        let result = loader
            .invoke(TypedContext::new().shared(), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(result.get(&1), Some(&2));
        assert_eq!(result.get(&3), Some(&6));
        assert!(!loader.needs_context());
    }

    #[tokio::test]
    async fn test_async_context_loader() {
        let loader =
            Loader::from_async_with_context("tenant", |ctx: SharedContext, keys: Vec<u8>| async move {
                let tenant = ctx.get::<Tenant>().map_or("none", |t| t.0);
                Ok(keys
                    .into_iter()
                    .map(|k| (k, format!("{tenant}:{k}")))
                    .collect())
            });
        let ctx = TypedContext::new().with(Tenant("acme")).shared();
        let result = loader.invoke(ctx, vec![7]).await.unwrap();
        assert_eq!(result.get(&7).map(String::as_str), Some("acme:7"));
        assert!(loader.needs_context());
    }

    #[test]
    fn test_identity_per_registration() {
        let make = || Loader::new("same", |_: &[u8]| Ok(HashMap::<u8, u8>::new()));
        let a = make();
        let b = make();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
