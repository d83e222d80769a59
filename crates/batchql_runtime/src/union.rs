//! Union fields.
//!
//! A union field concatenates the outputs of several contributions for one
//! entity, in declaration order. Contributions run concurrently so that
//! their batch plans coalesce, but the result order never depends on which
//! finishes first.

use crate::error::BatchError;
use crate::loader::{BatchKey, BatchValue, Loader};
use crate::session::ResolutionSession;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

/// An output item tagged with the contribution that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    /// Index of the contribution in declaration order.
    pub source: usize,
    pub label: Arc<str>,
    pub item: T,
}

/// One source of items for a union field.
#[async_trait]
pub trait Contribution<E, T>: Send + Sync {
    fn label(&self) -> &str;

    /// Items this contribution yields for `entity`. An empty vector is a
    /// valid, non-error outcome.
    async fn contribute(
        &self,
        session: &ResolutionSession,
        entity: &E,
    ) -> Result<Vec<T>, BatchError>;
}

/// Ordered contributions for one logical field.
pub struct UnionField<E, T> {
    name: Arc<str>,
    contributions: Vec<(Arc<str>, Arc<dyn Contribution<E, T>>)>,
}

impl<E, T> UnionField<E, T>
where
    E: Sync,
    T: Send,
{
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            contributions: Vec::new(),
        }
    }

    pub fn with(mut self, contribution: impl Contribution<E, T> + 'static) -> Self {
        self.push(contribution);
        self
    }

    pub fn push(&mut self, contribution: impl Contribution<E, T> + 'static) {
        let label = Arc::from(contribution.label());
        self.contributions.push((label, Arc::new(contribution)));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Evaluates every contribution against `entity` and concatenates the
    /// results in declaration order. Any failure discards the partial output.
    pub async fn combine(
        &self,
        session: &ResolutionSession,
        entity: &E,
    ) -> Result<Vec<Tagged<T>>, BatchError> {
        let outputs = try_join_all(
            self.contributions
                .iter()
                .map(|(_, contribution)| contribution.contribute(session, entity)),
        )
        .await?;

        let mut combined = Vec::with_capacity(outputs.iter().map(Vec::len).sum());
        let labelled = outputs.into_iter().zip(&self.contributions);
        for (source, (items, (label, _))) in labelled.enumerate() {
            combined.extend(items.into_iter().map(|item| Tagged {
                source,
                label: Arc::clone(label),
                item,
            }));
        }
        Ok(combined)
    }

    /// Combines for many entities at once; plans coalesce across entities.
    pub async fn combine_all(
        &self,
        session: &ResolutionSession,
        entities: &[E],
    ) -> Result<Vec<Vec<Tagged<T>>>, BatchError> {
        try_join_all(entities.iter().map(|entity| self.combine(session, entity))).await
    }
}

type KeyFn<E, K> = Arc<dyn Fn(&E) -> Option<K> + Send + Sync>;
type ProjectFn<R, T> = Arc<dyn Fn(R) -> Vec<T> + Send + Sync>;

/// A single batch: entity -> key -> loader result -> items.
pub struct BatchContribution<E, K, R, T> {
    label: Arc<str>,
    loader: Loader<K, R>,
    key_of: KeyFn<E, K>,
    project: ProjectFn<R, T>,
}

impl<E, K: BatchKey, R: BatchValue, T> BatchContribution<E, K, R, T> {
    pub fn new(
        label: impl Into<Arc<str>>,
        loader: Loader<K, R>,
        key_of: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
        project: impl Fn(R) -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            loader,
            key_of: Arc::new(key_of),
            project: Arc::new(project),
        }
    }
}

impl<E, K: BatchKey, T: BatchValue> BatchContribution<E, K, Vec<T>, T> {
    /// A loader that already returns a list per key.
    pub fn many(
        label: impl Into<Arc<str>>,
        loader: Loader<K, Vec<T>>,
        key_of: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        Self::new(label, loader, key_of, |items| items)
    }
}

impl<E, K: BatchKey, T: BatchValue> BatchContribution<E, K, T, T> {
    /// A loader returning at most one item per key.
    pub fn one(
        label: impl Into<Arc<str>>,
        loader: Loader<K, T>,
        key_of: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        Self::new(label, loader, key_of, |item| vec![item])
    }
}

#[async_trait]
impl<E, K, R, T> Contribution<E, T> for BatchContribution<E, K, R, T>
where
    E: Sync,
    K: BatchKey,
    R: BatchValue,
    T: Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn contribute(
        &self,
        session: &ResolutionSession,
        entity: &E,
    ) -> Result<Vec<T>, BatchError> {
        let Some(key) = (self.key_of)(entity) else {
            return Ok(Vec::new());
        };
        Ok(session
            .load(&self.loader, key)
            .await?
            .map(|result| (self.project)(result))
            .unwrap_or_default())
    }
}

/// A batch whose result keys a second batch.
///
/// The first stage coalesces across entities, then every second-stage key
/// from every entity coalesces into one further invocation.
pub struct ChainContribution<E, K, R, K2, R2, T> {
    label: Arc<str>,
    first: Loader<K, R>,
    key_of: KeyFn<E, K>,
    next_keys: Arc<dyn Fn(&R) -> Vec<K2> + Send + Sync>,
    second: Loader<K2, R2>,
    project: ProjectFn<R2, T>,
}

impl<E, K, R, K2, R2, T> ChainContribution<E, K, R, K2, R2, T>
where
    K: BatchKey,
    R: BatchValue,
    K2: BatchKey,
    R2: BatchValue,
{
    pub fn new(
        label: impl Into<Arc<str>>,
        first: Loader<K, R>,
        key_of: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
        next_keys: impl Fn(&R) -> Vec<K2> + Send + Sync + 'static,
        second: Loader<K2, R2>,
        project: impl Fn(R2) -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            first,
            key_of: Arc::new(key_of),
            next_keys: Arc::new(next_keys),
            second,
            project: Arc::new(project),
        }
    }
}

#[async_trait]
impl<E, K, R, K2, R2, T> Contribution<E, T> for ChainContribution<E, K, R, K2, R2, T>
where
    E: Sync,
    K: BatchKey,
    R: BatchValue,
    K2: BatchKey,
    R2: BatchValue,
    T: Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn contribute(
        &self,
        session: &ResolutionSession,
        entity: &E,
    ) -> Result<Vec<T>, BatchError> {
        let Some(key) = (self.key_of)(entity) else {
            return Ok(Vec::new());
        };
        let Some(intermediate) = session.load(&self.first, key).await? else {
            return Ok(Vec::new());
        };
        let keys = (self.next_keys)(&intermediate);
        let results = session.load_many(&self.second, keys).await?;
        Ok(results
            .into_iter()
            .flatten()
            .flat_map(|result| (self.project)(result))
            .collect())
    }
}

/// Items computed directly from the entity, with no batch function.
pub struct DirectContribution<E, T> {
    label: Arc<str>,
    resolve: Arc<dyn Fn(&E) -> Vec<T> + Send + Sync>,
}

impl<E, T> DirectContribution<E, T> {
    pub fn new(
        label: impl Into<Arc<str>>,
        resolve: impl Fn(&E) -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            resolve: Arc::new(resolve),
        }
    }
}

#[async_trait]
impl<E: Sync, T: Send> Contribution<E, T> for DirectContribution<E, T> {
    fn label(&self) -> &str {
        &self.label
    }

    async fn contribute(
        &self,
        _session: &ResolutionSession,
        entity: &E,
    ) -> Result<Vec<T>, BatchError> {
        Ok((self.resolve)(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_direct_contributions_keep_order() {
        let field = UnionField::new("tags")
            .with(DirectContribution::new("a", |n: &u32| vec![format!("a{n}")]))
            .with(DirectContribution::new("empty", |_: &u32| Vec::new()))
            .with(DirectContribution::new("b", |n: &u32| {
                vec![format!("b{n}"), format!("b{}", n + 1)]
            }));
        assert_eq!(field.len(), 3);

        let session = ResolutionSession::default();
        let items = field.combine(&session, &1).await.unwrap();
        let rendered: Vec<_> = items.iter().map(|t| (t.source, t.item.as_str())).collect();
        assert_eq!(rendered, vec![(0, "a1"), (2, "b1"), (2, "b2")]);
        assert_eq!(&*items[1].label, "b");
    }

    #[tokio::test]
    async fn test_missing_key_contributes_nothing() {
        let loader = Loader::new("never", |_: &[u32]| -> crate::loader::LoadResult<u32, String> {
            Ok(HashMap::new())
        });
        let field = UnionField::new("maybe").with(BatchContribution::one(
            "never",
            loader,
            |_: &u32| None,
        ));
        let session = ResolutionSession::default();
        assert!(field.combine(&session, &5).await.unwrap().is_empty());
        assert_eq!(session.stats().await.invocations, 0);
    }
}
