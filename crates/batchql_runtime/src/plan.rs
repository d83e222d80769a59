//! Batch plans.
//!
//! A plan accumulates the distinct keys requested from one batch function
//! (per context identity) and owns the single shared outcome every requester
//! waits on. It moves Open -> Executing -> Completed exactly once.

use crate::config::SessionConfig;
use crate::context::{ContextId, SharedContext, TypedContext};
use crate::error::BatchError;
use crate::loader::{BatchKey, BatchValue, Loader, LoaderId};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use indexmap::IndexSet;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn, Instrument};

/// Shared result slot; `None` until the plan completes or is faulted.
pub(crate) type Outcome<K, R> = Option<Result<Arc<HashMap<K, R>>, BatchError>>;

/// Deduplication key of a plan: function identity plus, for functions that
/// read it, the context identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub loader: LoaderId,
    pub context: Option<ContextId>,
}

impl PlanKey {
    pub fn of<K: BatchKey, R: BatchValue>(loader: &Loader<K, R>, context: &TypedContext) -> Self {
        Self {
            loader: loader.id(),
            context: loader.needs_context().then(|| context.id()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    /// Accepting keys.
    Open,
    /// The batch function is running; late keys open a new plan.
    Executing,
    /// The outcome has been published.
    Completed,
}

/// A started plan, ready to be spawned.
pub(crate) struct Execution {
    pub future: BoxFuture<'static, ()>,
    /// Publishes an error unless an outcome already exists.
    pub fault: Arc<dyn Fn(BatchError) + Send + Sync>,
    pub invocations: usize,
}

/// Type-erased view of a plan so the session can hold plans of any key and
/// result type in one map.
pub(crate) trait ErasedPlan: Send + Sync {
    fn state(&self) -> PlanState;
    fn begin(&mut self, config: &SessionConfig) -> Option<Execution>;
    fn fault(&self, error: BatchError);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct BatchPlan<K, R> {
    key: PlanKey,
    loader: Loader<K, R>,
    context: SharedContext,
    keys: IndexSet<K>,
    started: bool,
    outcome: Arc<watch::Sender<Outcome<K, R>>>,
}

impl<K: BatchKey, R: BatchValue> BatchPlan<K, R> {
    pub fn new(key: PlanKey, loader: Loader<K, R>, context: SharedContext) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            key,
            loader,
            context,
            keys: IndexSet::new(),
            started: false,
            outcome: Arc::new(sender),
        }
    }

    /// Adds a key (idempotent) and subscribes to the outcome.
    pub fn add(&mut self, key: K) -> watch::Receiver<Outcome<K, R>> {
        debug_assert!(!self.started, "keys added to a started plan");
        self.keys.insert(key);
        self.outcome.subscribe()
    }
}

fn publish<K, R>(
    sender: &watch::Sender<Outcome<K, R>>,
    result: Result<Arc<HashMap<K, R>>, BatchError>,
) -> bool {
    sender.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        true
    })
}

impl<K: BatchKey, R: BatchValue> ErasedPlan for BatchPlan<K, R> {
    fn state(&self) -> PlanState {
        if !self.started {
            PlanState::Open
        } else if self.outcome.borrow().is_some() {
            PlanState::Completed
        } else {
            PlanState::Executing
        }
    }

    fn begin(&mut self, config: &SessionConfig) -> Option<Execution> {
        if self.started {
            return None;
        }
        self.started = true;

        let keys: Vec<K> = std::mem::take(&mut self.keys).into_iter().collect();
        if keys.is_empty() {
            // Nothing requested: complete without calling the function.
            publish(&self.outcome, Ok(Arc::new(HashMap::new())));
            return None;
        }

        let key_count = keys.len();
        let chunks: Vec<Vec<K>> = match config.max_batch_size {
            Some(size) if size < key_count => keys.chunks(size).map(<[K]>::to_vec).collect(),
            _ => vec![keys],
        };
        let invocations = chunks.len();
        debug!(
            loader = self.loader.name(),
            context = ?self.key.context,
            keys = key_count,
            invocations,
            "executing batch plan"
        );

        let loader = self.loader.clone();
        let context = Arc::clone(&self.context);
        let outcome = Arc::clone(&self.outcome);
        let timeout = config.batch_timeout;
        let span = tracing::debug_span!("batch", loader = %loader.name(), keys = key_count);
        let future = async move {
            let result = AssertUnwindSafe(execute(&loader, context, chunks, timeout))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(BatchError::failed(loader.name(), "batch function panicked"))
                });
            match &result {
                Ok(results) => debug!(results = results.len(), "batch plan completed"),
                Err(error) => warn!(%error, "batch plan failed"),
            }
            publish(&outcome, result);
        }
        .instrument(span);

        let fault_outcome = Arc::clone(&self.outcome);
        Some(Execution {
            future: Box::pin(future),
            fault: Arc::new(move |error| {
                publish(&fault_outcome, Err(error));
            }),
            invocations,
        })
    }

    fn fault(&self, error: BatchError) {
        publish(&self.outcome, Err(error));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Runs every chunk and merges the per-chunk maps. Any failing chunk fails
/// the whole plan.
async fn execute<K: BatchKey, R: BatchValue>(
    loader: &Loader<K, R>,
    context: SharedContext,
    chunks: Vec<Vec<K>>,
    timeout: Option<Duration>,
) -> Result<Arc<HashMap<K, R>>, BatchError> {
    let calls = chunks.into_iter().map(|chunk| {
        let call = loader.invoke(Arc::clone(&context), chunk);
        let name = loader.shared_name();
        async move {
            let result = match timeout {
                Some(after) => match tokio::time::timeout(after, call).await {
                    Ok(result) => result,
                    Err(_) => return Err(BatchError::Timeout { loader: name, after }),
                },
                None => call.await,
            };
            result.map_err(|error| BatchError::failed(&name, error))
        }
    });

    let mut merged = HashMap::new();
    for results in try_join_all(calls).await? {
        merged.extend(results);
    }
    Ok(Arc::new(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plan_for(loader: &Loader<u32, String>) -> BatchPlan<u32, String> {
        let context = TypedContext::new().shared();
        let key = PlanKey::of(loader, &context);
        BatchPlan::new(key, loader.clone(), context)
    }

    #[tokio::test]
    async fn test_plan_lifecycle() {
        let loader = Loader::new("names", |keys: &[u32]| {
            Ok(keys.iter().map(|k| (*k, format!("n{k}"))).collect())
        });
        let mut plan = plan_for(&loader);
        let mut rx = plan.add(1);
        plan.add(1);
        plan.add(2);
        assert_eq!(plan.state(), PlanState::Open);

        let execution = plan.begin(&SessionConfig::default()).unwrap();
        assert_eq!(execution.invocations, 1);
        assert_eq!(plan.state(), PlanState::Executing);
        assert!(plan.begin(&SessionConfig::default()).is_none());

        execution.future.await;
        assert_eq!(plan.state(), PlanState::Completed);
        let outcome = rx.wait_for(Option::is_some).await.unwrap();
        let results = outcome.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.get(&2).map(String::as_str), Some("n2"));
    }

    #[tokio::test]
    async fn test_empty_plan_is_not_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = Loader::new("never", move |_: &[u32]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        });
        let mut plan = plan_for(&loader);
        assert!(plan.begin(&SessionConfig::default()).is_none());
        assert_eq!(plan.state(), PlanState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chunked_execution_merges_results() {
        let loader = Loader::new("chunks", |keys: &[u32]| {
            assert!(keys.len() <= 2);
            Ok(keys.iter().map(|k| (*k, k.to_string())).collect())
        });
        let mut plan = plan_for(&loader);
        let mut rx = plan.add(1);
        for key in 2..=5 {
            plan.add(key);
        }
        let execution = plan
            .begin(&SessionConfig::default().with_max_batch_size(2))
            .unwrap();
        assert_eq!(execution.invocations, 3);
        execution.future.await;
        let outcome = rx.wait_for(Option::is_some).await.unwrap();
        assert_eq!(outcome.as_ref().unwrap().as_ref().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_fault_is_published_once() {
        let loader = Loader::new("faulted", |_: &[u32]| Ok(HashMap::new()));
        let mut plan = plan_for(&loader);
        let mut rx = plan.add(9);
        plan.fault(BatchError::Cancelled);
        plan.fault(BatchError::failed("faulted", "second"));
        let outcome = rx.wait_for(Option::is_some).await.unwrap();
        assert_eq!(outcome.as_ref().unwrap().as_ref().unwrap_err(), &BatchError::Cancelled);
    }
}
