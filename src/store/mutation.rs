//! `MutationStore` — the per-operation runtime for an argument-in/
//! value-out invocation with bounded history (`spec.md` §4.6).

use crate::context::Context;
use crate::continuation::Continuation;
use crate::controller::{controllers, ControlSink, Controls};
use crate::error::{MisuseWarning, OperationFailure, RuntimeError};
use crate::modifier::default_value::default_value;
use crate::modifier::events::{dispatch_result, with_event_handlers, EventHandlers};
use crate::modifier::max_history::max_history_length;
use crate::path::OperationPath;
use crate::request::mutation::with_arguments;
use crate::request::Request;
use crate::state::mutation::MutationState;
use crate::state::OperationStatus;
use crate::store::{AnyStore, StateChangeHandler, Subscribers};
use crate::subscription::Subscription;
use crate::task::{Task, TaskConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// The runtime for a single mutation-shaped request. `R` is the fully
/// assembled request chain (already wrapped in
/// [`crate::request::mutation::MutationAdapter`] by whatever built it);
/// `A` is the arguments type each invocation takes, installed into the
/// run context via [`with_arguments`] before the chain ever sees it.
///
/// Unlike [`crate::store::query::QueryStore`], a mutation store never
/// self-schedules a run: there is no "stale" concept for an operation
/// that only ever runs when a caller supplies arguments.
pub struct MutationStore<A, R: Request> {
    self_weak: Weak<Self>,
    path: OperationPath,
    request: R,
    base_context: Mutex<Context>,
    state: Mutex<MutationState<A, R::Value, R::Failure>>,
    subscribers: Subscribers,
    auxiliary: Mutex<Vec<Subscription>>,
    _arguments: PhantomData<A>,
}

impl<A, R> MutationStore<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Request,
{
    /// Build a new store for `request`, seeded with `initial_value` and
    /// `base_context`. History capacity is read from
    /// [`crate::modifier::max_history::MaxHistoryLength`] (default 25)
    /// after `request.setup` has run.
    pub fn new(
        request: R,
        initial_value: Option<R::Value>,
        mut base_context: Context,
        path: OperationPath,
    ) -> Arc<Self> {
        request.setup(&mut base_context);
        let capacity = max_history_length(&base_context);
        let installed_controllers = controllers::<R::Value, R::Failure>(&base_context);

        Arc::new_cyclic(|weak| {
            let mut auxiliary = Vec::new();
            for controller in &installed_controllers {
                let weak_dyn: Weak<dyn ControlSink<R::Value, R::Failure>> = weak.clone();
                auxiliary.push(controller.control(Controls::new(weak_dyn)));
            }

            Self {
                self_weak: weak.clone(),
                path,
                request,
                base_context: Mutex::new(base_context),
                state: Mutex::new(MutationState::new(initial_value, capacity)),
                subscribers: Subscribers::new(),
                auxiliary: Mutex::new(auxiliary),
                _arguments: PhantomData,
            }
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("store method invoked while the store itself is being dropped")
    }

    fn publish(&self) {
        self.subscribers.notify();
    }

    fn ingest(&self, id: crate::task::TaskId, result: Result<R::Value, R::Failure>, ctx: &Context) {
        let at = ctx.clock().now();
        self.state.lock().ingest(id, result, at);
    }

    fn make_continuation(
        &self,
        id: crate::task::TaskId,
        ctx: Context,
    ) -> Continuation<R::Value, R::Failure> {
        let store = self.arc();
        Continuation::new(ctx, move |result, run_ctx, reason| {
            dispatch_result(&run_ctx, &result, reason);
            store.ingest(id, result, &run_ctx);
            store.publish();
        })
    }

    async fn drive(
        &self,
        task: Arc<Task<R::Value, R::Failure>>,
        ctx: Context,
    ) -> Option<Result<R::Value, R::Failure>> {
        let continuation = self.make_continuation(task.id(), ctx.clone());
        let isolation = task.isolation();
        let outcome = task
            .clone()
            .run_if_needed(self.request.run(isolation, ctx.clone(), continuation))
            .await;
        self.state.lock().finish_invocation(task.id());
        if let Some(result) = &outcome {
            self.ingest(task.id(), result.clone(), &ctx);
        }
        self.publish();
        outcome
    }

    async fn execute(
        &self,
        arguments: A,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<R::Value, R::Failure>>>,
    ) -> Result<R::Value, OperationFailure<R::Failure>> {
        let mut ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        with_event_handlers(&mut ctx, handler);
        with_arguments::<A>(&mut ctx, arguments.clone());

        let task_config = TaskConfig::new(ctx.clone()).default_name("mutate");
        let task: Arc<Task<R::Value, R::Failure>> = Task::new(task_config, Vec::new());
        let start = ctx.clock().now();
        self.state.lock().start_invocation(arguments, task.clone(), start);
        self.publish();

        let outcome = self.drive(task, ctx).await;

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(OperationFailure::Operation(error)),
            None => Err(OperationFailure::Cancelled),
        }
    }

    /// Execute one invocation with `arguments`, recording it as a new
    /// history entry (`spec.md` §4.6).
    pub async fn mutate(&self, arguments: A) -> Result<R::Value, OperationFailure<R::Failure>> {
        self.execute(arguments, None, None).await
    }

    /// Execute a new invocation with the most recently used arguments.
    /// Fails with [`RuntimeError::NoPriorInvocation`] if history is empty
    /// (`spec.md` §4.6).
    pub async fn retry_latest(
        &self,
    ) -> Result<Result<R::Value, OperationFailure<R::Failure>>, RuntimeError> {
        let latest = self.state.lock().latest_arguments().cloned();
        match latest {
            Some(arguments) => Ok(self.mutate(arguments).await),
            None => {
                let path = format!("{:?}", self.path);
                let warning = MisuseWarning::RetryWithoutPriorInvocation { path: path.clone() };
                tracing::warn!(%warning, "retry_latest called with no prior invocation");
                Err(RuntimeError::NoPriorInvocation { path })
            }
        }
    }

    /// Restore to the seeded initial value and clear history, cancelling
    /// every in-flight invocation (`spec.md` §4.6).
    pub fn reset_state(&self) {
        let effect = self.state.lock().reset();
        effect.apply();
        self.publish();
    }

    /// Write a result directly into the aggregate current/error fields,
    /// bypassing history (`spec.md` §4.6).
    pub fn set_result(&self, result: Result<R::Value, R::Failure>, ctx_override: Option<Context>) {
        let ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        let at = ctx.clock().now();
        self.state.lock().ingest_external(result, at);
        self.publish();
    }

    pub fn subscribe(&self, handler: StateChangeHandler) -> Subscription {
        let (id, _) = self.subscribers.add(handler);
        let store = self.arc();
        Subscription::new(move || {
            store.subscribers.remove(id);
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    pub fn state(&self) -> OperationStatus<R::Value, R::Failure> {
        self.state.lock().status()
    }

    /// The current value, falling back to any
    /// [`crate::modifier::default_value::DefaultValue`] installed.
    pub fn current_value(&self) -> Option<R::Value> {
        let held = self.state.lock().current().cloned();
        held.or_else(|| default_value::<R::Value>(&self.base_context.lock()))
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading()
    }

    pub fn context(&self) -> Context {
        self.base_context.lock().clone()
    }

    pub fn path(&self) -> &OperationPath {
        &self.path
    }

    /// Run `f` with exclusive access to the underlying state container —
    /// the only way to read the full invocation history
    /// (`spec.md` §4.6: `with_exclusive_access`).
    pub fn with_exclusive_access<T>(
        &self,
        f: impl FnOnce(&mut MutationState<A, R::Value, R::Failure>) -> T,
    ) -> T {
        f(&mut self.state.lock())
    }

    fn teardown(&self) {
        for sub in self.auxiliary.lock().drain(..) {
            sub.cancel();
        }
        self.state.lock().reset().apply();
    }
}

impl<A, R: Request> Drop for MutationStore<A, R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<A: Send + Sync, R: Request> std::fmt::Debug for MutationStore<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationStore")
            .field("path", &self.path)
            .field("subscribers", &self.subscribers.count())
            .field("loading", &self.state.lock().is_loading())
            .finish()
    }
}

impl<A, R> AnyStore for MutationStore<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Request,
{
    fn path(&self) -> &OperationPath {
        &self.path
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    fn is_loading(&self) -> bool {
        self.state.lock().is_loading()
    }

    fn evict(&self) {
        self.teardown();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl<A, R> ControlSink<R::Value, R::Failure> for MutationStore<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Request,
{
    fn yield_now(&self, result: Result<R::Value, R::Failure>, context: Option<Context>) {
        self.set_result(result, context);
    }

    /// A mutation has no arguments to refetch with on its own; a
    /// controller can only push results, never trigger a refetch.
    fn can_yield_refetch(&self) -> bool {
        false
    }

    async fn yield_refetch(
        &self,
        _context: Option<Context>,
    ) -> Option<Result<R::Value, R::Failure>> {
        None
    }

    fn context(&self) -> Context {
        self.context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::mutation::{arguments, MutationAdapter};

    struct Doubler;

    #[async_trait::async_trait]
    impl crate::request::mutation::MutationRequest for Doubler {
        type Arguments = i32;
        type Value = i32;
        type Failure = String;

        async fn mutate(
            &self,
            arguments: i32,
            _context: &Context,
            _continuation: &Continuation<i32, String>,
        ) -> Result<i32, String> {
            if arguments < 0 {
                Err("negative".to_string())
            } else {
                Ok(arguments * 2)
            }
        }
    }

    fn path() -> OperationPath {
        OperationPath::from_elements(["doubler".into()])
    }

    fn store() -> Arc<MutationStore<i32, MutationAdapter<Doubler>>> {
        MutationStore::new(MutationAdapter(Doubler), None, Context::new(), path())
    }

    #[tokio::test]
    async fn mutate_success_updates_current_and_history() {
        let store = store();
        let result = store.mutate(21).await;
        assert_eq!(result, Ok(42));
        assert_eq!(store.current_value(), Some(42));
        store.with_exclusive_access(|state| {
            assert_eq!(state.history().len(), 1);
        });
    }

    #[tokio::test]
    async fn mutate_failure_is_wrapped_as_operation_failure() {
        let store = store();
        let result = store.mutate(-1).await;
        assert_eq!(result, Err(OperationFailure::Operation("negative".to_string())));
    }

    #[tokio::test]
    async fn retry_latest_fails_without_prior_invocation() {
        let store = store();
        let result = store.retry_latest().await;
        assert!(matches!(result, Err(RuntimeError::NoPriorInvocation { .. })));
    }

    #[tokio::test]
    async fn retry_latest_replays_most_recent_arguments() {
        let store = store();
        store.mutate(5).await.unwrap();
        let result = store.retry_latest().await.unwrap();
        assert_eq!(result, Ok(10));
        store.with_exclusive_access(|state| {
            assert_eq!(state.history().len(), 2);
        });
    }

    #[tokio::test]
    async fn reset_state_clears_history_and_current() {
        let store = store();
        store.mutate(1).await.unwrap();
        store.reset_state();
        assert_eq!(store.current_value(), None);
        store.with_exclusive_access(|state| {
            assert!(state.history().is_empty());
        });
    }

    #[tokio::test]
    async fn history_respects_max_history_length_modifier() {
        use crate::modifier::max_history::MaxHistoryLength;
        use crate::modifier::RequestExt;

        let request = MutationAdapter(Doubler).with_modifier(MaxHistoryLength::new(2));
        let store = MutationStore::new(request, None, Context::new(), path());
        for n in 0..3 {
            store.mutate(n).await.unwrap();
        }
        store.with_exclusive_access(|state| {
            assert_eq!(state.history().len(), 2);
        });
    }

    #[test]
    fn arguments_helper_reads_installed_value() {
        let mut ctx = Context::new();
        with_arguments(&mut ctx, 9i32);
        assert_eq!(arguments::<i32>(&ctx), 9);
    }
}
