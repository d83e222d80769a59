//! Resolution sessions.
//!
//! A session owns the batch plans of one resolution pass. Consumers register
//! keys and receive a [`Deferred`]; the first consumer to demand a value
//! flushes every open plan, and each plan runs its batch function once.

use crate::config::SessionConfig;
use crate::context::{SharedContext, TypedContext};
use crate::error::BatchError;
use crate::loader::{BatchKey, BatchValue, Loader};
use crate::plan::{BatchPlan, ErasedPlan, Outcome, PlanKey, PlanState};
use futures::future::try_join_all;
use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Keys registered, duplicates included.
    pub requests: usize,
    /// Plans opened, including plans reopened after an earlier one started.
    pub plans_opened: usize,
    /// Batch function invocations started.
    pub invocations: usize,
}

struct InFlight {
    handle: JoinHandle<()>,
    fault: Arc<dyn Fn(BatchError) + Send + Sync>,
}

#[derive(Default)]
struct SessionState {
    plans: FxHashMap<PlanKey, Box<dyn ErasedPlan>>,
    dirty: IndexSet<PlanKey, FxBuildHasher>,
    in_flight: Vec<InFlight>,
    cancelled: bool,
    stats: SessionStats,
}

impl SessionState {
    /// Faults every unfinished plan and aborts running invocations.
    fn teardown(&mut self) {
        for flight in self.in_flight.drain(..) {
            flight.handle.abort();
            (flight.fault)(BatchError::Cancelled);
        }
        for plan in self.plans.values() {
            plan.fault(BatchError::Cancelled);
        }
        self.plans.clear();
        self.dirty.clear();
    }
}

struct SessionInner {
    config: SessionConfig,
    context: SharedContext,
    state: Mutex<SessionState>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.cancelled {
            state.cancelled = true;
            state.teardown();
        }
    }
}

/// Scope of deferred batch resolution.
///
/// Cheap to clone; clones share plans. Plans are keyed by loader identity
/// and, for loaders that read it, by context identity.
#[derive(Clone)]
pub struct ResolutionSession {
    inner: Arc<SessionInner>,
}

impl Default for ResolutionSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl ResolutionSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_context(config, TypedContext::new().shared())
    }

    /// Creates a session whose default context is `context`.
    pub fn with_context(config: SessionConfig, context: SharedContext) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                context,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    /// Registers `key` against `loader` under the session context.
    pub async fn request<K: BatchKey, R: BatchValue>(
        &self,
        loader: &Loader<K, R>,
        key: K,
    ) -> Deferred<K, R> {
        let context = Arc::clone(&self.inner.context);
        self.request_in(loader, &context, key).await
    }

    /// Registers `key` against `loader` under an explicit context.
    pub async fn request_in<K: BatchKey, R: BatchValue>(
        &self,
        loader: &Loader<K, R>,
        context: &SharedContext,
        key: K,
    ) -> Deferred<K, R> {
        let plan_key = PlanKey::of(loader, context);
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.cancelled {
            return Deferred::faulted(self, key, BatchError::Cancelled);
        }
        state.stats.requests += 1;

        let reopen = state
            .plans
            .get(&plan_key)
            .map_or(true, |plan| plan.state() != PlanState::Open);
        if reopen {
            let plan = BatchPlan::new(plan_key, loader.clone(), Arc::clone(context));
            state.plans.insert(plan_key, Box::new(plan));
            state.stats.plans_opened += 1;
            debug!(loader = loader.name(), context = ?plan_key.context, "opened batch plan");
        }

        let receiver = state
            .plans
            .get_mut(&plan_key)
            .and_then(|plan| plan.as_any_mut().downcast_mut::<BatchPlan<K, R>>())
            .map(|plan| plan.add(key.clone()));
        let Some(receiver) = receiver else {
            let error = BatchError::failed(loader.name(), "plan holds a different key type");
            return Deferred::faulted(self, key, error);
        };
        state.dirty.insert(plan_key);
        trace!(loader = loader.name(), "registered key");

        Deferred {
            key,
            receiver,
            session: self.clone(),
        }
    }

    /// Starts every open plan with registered keys. Returns how many plans
    /// began executing.
    pub async fn flush(&self) -> usize {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.cancelled {
            return 0;
        }
        state.in_flight.retain(|flight| !flight.handle.is_finished());

        let mut started = 0;
        for plan_key in std::mem::take(&mut state.dirty) {
            let Some(plan) = state.plans.get_mut(&plan_key) else {
                continue;
            };
            let Some(execution) = plan.begin(&self.inner.config) else {
                continue;
            };
            state.stats.invocations += execution.invocations;
            started += 1;
            state.in_flight.push(InFlight {
                handle: tokio::spawn(execution.future),
                fault: execution.fault,
            });
        }
        if started > 0 {
            debug!(plans = started, "flushed batch plans");
        }
        started
    }

    /// Resolves one key.
    pub async fn load<K: BatchKey, R: BatchValue>(
        &self,
        loader: &Loader<K, R>,
        key: K,
    ) -> Result<Option<R>, BatchError> {
        self.request(loader, key).await.resolve().await
    }

    /// Resolves several keys through one plan, preserving input order.
    pub async fn load_many<K, R, I>(
        &self,
        loader: &Loader<K, R>,
        keys: I,
    ) -> Result<Vec<Option<R>>, BatchError>
    where
        K: BatchKey,
        R: BatchValue,
        I: IntoIterator<Item = K>,
    {
        let mut pending = Vec::new();
        for key in keys {
            pending.push(self.request(loader, key).await);
        }
        try_join_all(pending.into_iter().map(Deferred::resolve)).await
    }

    /// State of the current plan for `loader` under the session context.
    pub async fn plan_state<K: BatchKey, R: BatchValue>(
        &self,
        loader: &Loader<K, R>,
    ) -> Option<PlanState> {
        let plan_key = PlanKey::of(loader, &self.inner.context);
        let state = self.inner.state.lock().await;
        state.plans.get(&plan_key).map(|plan| plan.state())
    }

    /// Cancels the session. Unfinished plans fail with
    /// [`BatchError::Cancelled`] and later requests fail immediately.
    pub async fn cancel(&self) {
        let mut state = self.inner.state.lock().await;
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        state.teardown();
        debug!("resolution session cancelled");
    }

    pub async fn is_cancelled(&self) -> bool {
        self.inner.state.lock().await.cancelled
    }

    /// Runs `future`, cancelling the session if it does not finish within
    /// `deadline`.
    pub async fn with_deadline<F, T>(&self, deadline: Duration, future: F) -> Result<T, BatchError>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(deadline, future).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(?deadline, "resolution session exceeded its deadline");
                self.cancel().await;
                Err(BatchError::DeadlineExceeded(deadline))
            }
        }
    }

    pub async fn stats(&self) -> SessionStats {
        self.inner.state.lock().await.stats
    }
}

/// A value that will be available once its plan completes.
#[must_use = "deferred values do nothing unless resolved"]
pub struct Deferred<K, R> {
    key: K,
    receiver: watch::Receiver<Outcome<K, R>>,
    session: ResolutionSession,
}

impl<K: BatchKey, R: BatchValue> Deferred<K, R> {
    fn faulted(session: &ResolutionSession, key: K, error: BatchError) -> Self {
        let (_sender, receiver) = watch::channel(Some(Err(error)));
        Self {
            key,
            receiver,
            session: session.clone(),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// True once the plan has an outcome.
    pub fn is_ready(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Waits for the plan, flushing pending plans first if nothing has
    /// started it yet. `Ok(None)` means the function returned no value for
    /// this key.
    pub async fn resolve(self) -> Result<Option<R>, BatchError> {
        let Self {
            key,
            mut receiver,
            session,
        } = self;

        if receiver.borrow().is_none() {
            if session.inner.config.yield_before_flush {
                tokio::task::yield_now().await;
            }
            if receiver.borrow().is_none() {
                session.flush().await;
            }
        }

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BatchError::Cancelled)?;
        match &*outcome {
            Some(Ok(results)) => Ok(results.get(&key).cloned()),
            Some(Err(error)) => Err(error.clone()),
            None => Err(BatchError::Cancelled),
        }
    }

    /// Like [`Deferred::resolve`], substituting `R::default()` for a missing
    /// value.
    pub async fn resolve_or_default(self) -> Result<R, BatchError>
    where
        R: Default,
    {
        Ok(self.resolve().await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(calls: &Arc<AtomicUsize>) -> Loader<u32, String> {
        let calls = Arc::clone(calls);
        Loader::new("count", move |keys: &[u32]| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(keys
                .iter()
                .filter(|k| **k != 0)
                .map(|k| (*k, format!("v{k}")))
                .collect())
        })
    }

    #[tokio::test]
    async fn test_deferred_resolution_flushes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(&calls);
        let session = ResolutionSession::default();

        let a = session.request(&loader, 1).await;
        let b = session.request(&loader, 2).await;
        let c = session.request(&loader, 1).await;
        assert!(!a.is_ready());
        assert_eq!(session.plan_state(&loader).await, Some(PlanState::Open));

        assert_eq!(a.resolve().await.unwrap().as_deref(), Some("v1"));
        assert_eq!(b.resolve().await.unwrap().as_deref(), Some("v2"));
        assert_eq!(c.resolve().await.unwrap().as_deref(), Some("v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = session.stats().await;
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.plans_opened, 1);
        assert_eq!(stats.invocations, 1);
    }

    #[tokio::test]
    async fn test_absent_key_resolves_to_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(&calls);
        let session = ResolutionSession::default();
        assert_eq!(session.load(&loader, 0).await.unwrap(), None);
        let deferred = session.request(&loader, 0).await;
        assert_eq!(deferred.resolve_or_default().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_flush_without_requests_starts_nothing() {
        let session = ResolutionSession::default();
        assert_eq!(session.flush().await, 0);
        assert_eq!(session.stats().await, SessionStats::default());
    }

    #[tokio::test]
    async fn test_request_after_cancel_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(&calls);
        let session = ResolutionSession::default();
        session.cancel().await;
        assert!(session.is_cancelled().await);
        let err = session.load(&loader, 1).await.unwrap_err();
        assert_eq!(err, BatchError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_many_preserves_order() {
        let loader = Loader::new("upper", |keys: &[&'static str]| {
            Ok(keys
                .iter()
                .map(|k| (*k, k.to_uppercase()))
                .collect::<HashMap<_, _>>())
        });
        let session = ResolutionSession::default();
        let values = session.load_many(&loader, ["b", "a", "b"]).await.unwrap();
        assert_eq!(
            values,
            vec![Some("B".to_string()), Some("A".to_string()), Some("B".to_string())]
        );
    }
}
