//! Loaders backed by a decomposed relation predicate.

use crate::error::{BatchError, LoadError};
use crate::loader::Loader;
use crate::session::{Deferred, ResolutionSession};
use crate::union::Contribution;
use async_trait::async_trait;
use batchql_core::{Key, Relation, RelationError};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Resolves a parent's children through one batched fetch per session.
///
/// The fetch receives the distinct parent keys and returns candidate
/// children in any order. Children are grouped by child key, dropped when
/// they fail the residual, and returned per parent key in fetch order.
#[derive(Clone)]
pub struct RelationLoader {
    relation: Arc<Relation>,
    loader: Loader<Key, Vec<Value>>,
}

impl RelationLoader {
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, relation: Relation, fetch: F) -> Self
    where
        F: Fn(Vec<Key>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, LoadError>> + Send + 'static,
    {
        let relation = Arc::new(relation);
        let grouping = Arc::clone(&relation);
        let loader = Loader::from_async(name, move |keys: Vec<Key>| {
            let relation = Arc::clone(&grouping);
            let children = fetch(keys);
            async move {
                let children = children.await?;
                Ok::<_, LoadError>(group_children(&relation, children))
            }
        });
        Self { relation, loader }
    }

    /// Parses and decomposes `predicate` before building the loader.
    pub fn parse<F, Fut>(
        name: impl Into<Arc<str>>,
        predicate: &str,
        fetch: F,
    ) -> Result<Self, RelationError>
    where
        F: Fn(Vec<Key>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, LoadError>> + Send + 'static,
    {
        Ok(Self::new(name, Relation::parse(predicate)?, fetch))
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn loader(&self) -> &Loader<Key, Vec<Value>> {
        &self.loader
    }

    /// Registers the parent's key, or `None` when the parent has no key.
    pub async fn request(
        &self,
        session: &ResolutionSession,
        parent: &Value,
    ) -> Option<Deferred<Key, Vec<Value>>> {
        let key = self.relation.parent_key_of(parent)?;
        Some(session.request(&self.loader, key).await)
    }

    /// Children of `parent`. A parent without a key has no children.
    pub async fn load(
        &self,
        session: &ResolutionSession,
        parent: &Value,
    ) -> Result<Vec<Value>, BatchError> {
        match self.request(session, parent).await {
            Some(deferred) => deferred.resolve_or_default().await,
            None => Ok(Vec::new()),
        }
    }
}

fn group_children(relation: &Relation, children: Vec<Value>) -> HashMap<Key, Vec<Value>> {
    let mut grouped: HashMap<Key, Vec<Value>> = HashMap::new();
    for child in children {
        if let Some(key) = relation.child_key_of(&child) {
            grouped.entry(key).or_default().push(child);
        }
    }
    grouped
}

#[async_trait]
impl Contribution<Value, Value> for RelationLoader {
    fn label(&self) -> &str {
        self.loader.name()
    }

    async fn contribute(
        &self,
        session: &ResolutionSession,
        entity: &Value,
    ) -> Result<Vec<Value>, BatchError> {
        self.load(session, entity).await
    }
}
