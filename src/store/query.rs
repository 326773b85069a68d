//! `QueryStore` — the per-operation runtime for a one-shot fetch
//! (`spec.md` §4.6).

use crate::context::Context;
use crate::continuation::Continuation;
use crate::controller::{controllers, ControlSink, Controls};
use crate::error::OperationFailure;
use crate::modifier::auto_run::automatic_running_enabled;
use crate::modifier::default_value::default_value;
use crate::modifier::events::{dispatch_result, with_event_handlers, EventHandlers};
use crate::modifier::rerun::rerun_specs;
use crate::modifier::stale::is_stale;
use crate::path::OperationPath;
use crate::request::Request;
use crate::state::query::QueryState;
use crate::state::OperationStatus;
use crate::store::{AnyStore, StateChangeHandler, Subscribers};
use crate::subscription::Subscription;
use crate::task::{Task, TaskConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, Weak};

/// The runtime for a single query-shaped request. Owns its state and
/// active tasks; serves subscribers (`spec.md` §4.6).
///
/// Holds a weak reference to itself (populated at construction via
/// `Arc::new_cyclic`, the same pattern `Context` uses for its back-
/// reference to the owning client) so that `&self`-only call sites —
/// notably [`ControlSink`], which is invoked through a type-erased
/// `Weak<dyn ControlSink<..>>` and therefore can never recover an owned
/// `Arc<Self>` on its own — can still build the `'static` continuation
/// closures a detached task execution requires.
pub struct QueryStore<R: Request> {
    self_weak: Weak<Self>,
    path: OperationPath,
    request: R,
    base_context: Mutex<Context>,
    state: Mutex<QueryState<R::Value, R::Failure>>,
    subscribers: Subscribers,
    auxiliary: Mutex<Vec<Subscription>>,
    auto_run_task: Mutex<Option<Arc<Task<R::Value, R::Failure>>>>,
}

impl<R: Request> QueryStore<R> {
    /// Build a new store for `request`, seeded with `initial_value` and
    /// `base_context`. Runs `request.setup` exactly once, then wires up
    /// any [`crate::modifier::rerun::RerunOnChange`] specs and
    /// [`crate::controller::Controller`]s the request's modifier chain
    /// registered.
    pub fn new(
        request: R,
        initial_value: Option<R::Value>,
        mut base_context: Context,
        path: OperationPath,
    ) -> Arc<Self> {
        request.setup(&mut base_context);
        let rerun = rerun_specs(&base_context);
        let installed_controllers = controllers::<R::Value, R::Failure>(&base_context);

        Arc::new_cyclic(|weak| {
            let mut auxiliary = Vec::new();
            for spec in &rerun {
                let weak_cb = weak.clone();
                auxiliary.push(spec.observe_changes(Arc::new(move |satisfied: bool| {
                    if satisfied {
                        if let Some(store) = weak_cb.upgrade() {
                            store.schedule_automatic_run();
                        }
                    }
                })));
            }
            for controller in &installed_controllers {
                let weak_dyn: Weak<dyn ControlSink<R::Value, R::Failure>> = weak.clone();
                auxiliary.push(controller.control(Controls::new(weak_dyn)));
            }

            Self {
                self_weak: weak.clone(),
                path,
                request,
                base_context: Mutex::new(base_context),
                state: Mutex::new(QueryState::new(initial_value)),
                subscribers: Subscribers::new(),
                auxiliary: Mutex::new(auxiliary),
                auto_run_task: Mutex::new(None),
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

    fn ingest(&self, result: Result<R::Value, R::Failure>, ctx: &Context) {
        let at = ctx.clock().now();
        let mut state = self.state.lock();
        match result {
            Ok(value) => state.ingest_value(value, at),
            Err(error) => state.ingest_error(error, at),
        }
    }

    fn make_continuation(&self, ctx: Context) -> Continuation<R::Value, R::Failure> {
        let store = self.arc();
        Continuation::new(ctx, move |result, run_ctx, reason| {
            dispatch_result(&run_ctx, &result, reason);
            store.ingest(result, &run_ctx);
            store.publish();
        })
    }

    /// Run the request body to completion under `task`, ingesting every
    /// yielded result (via the continuation) and the terminal result
    /// into state, and publishing a state-change after each.
    async fn drive(
        &self,
        task: Arc<Task<R::Value, R::Failure>>,
        ctx: Context,
    ) -> Option<Result<R::Value, R::Failure>> {
        let continuation = self.make_continuation(ctx.clone());
        let isolation = task.isolation();
        let outcome = task
            .clone()
            .run_if_needed(self.request.run(isolation, ctx.clone(), continuation))
            .await;
        self.state.lock().deregister_task(task.id());
        if let Some(result) = &outcome {
            self.ingest(result.clone(), &ctx);
        }
        self.publish();
        outcome
    }

    async fn execute(
        &self,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<R::Value, R::Failure>>>,
        track_as_auto: bool,
    ) -> Result<R::Value, OperationFailure<R::Failure>> {
        let mut ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        with_event_handlers(&mut ctx, handler);

        let task_config = TaskConfig::new(ctx.clone()).default_name("fetch");
        let task: Arc<Task<R::Value, R::Failure>> = Task::new(task_config, Vec::new());
        self.state.lock().register_task(task.clone());
        if track_as_auto {
            *self.auto_run_task.lock() = Some(task.clone());
        }
        self.publish();

        let outcome = self.drive(task.clone(), ctx).await;

        if track_as_auto {
            let mut guard = self.auto_run_task.lock();
            if guard.as_ref().map(|t| t.id()) == Some(task.id()) {
                *guard = None;
            }
        }

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(OperationFailure::Operation(error)),
            None => Err(OperationFailure::Cancelled),
        }
    }

    fn schedule_automatic_run(self: Arc<Self>) {
        tokio::spawn(async move {
            let _ = self.execute(None, None, true).await;
        });
    }

    fn cancel_automatic_run(&self) {
        if let Some(task) = self.auto_run_task.lock().take() {
            task.cancel();
        }
    }

    /// Run the request, returning its terminal result (`spec.md` §4.6).
    pub async fn run(
        &self,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<R::Value, R::Failure>>>,
    ) -> Result<R::Value, OperationFailure<R::Failure>> {
        self.execute(ctx_override, handler, false).await
    }

    /// Run the request in the background, returning the driving
    /// [`Task`] handle immediately (`spec.md` §4.6: "also obtainable as
    /// a task via `run_task`").
    pub fn run_task(
        self: &Arc<Self>,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<R::Value, R::Failure>>>,
    ) -> Arc<Task<R::Value, R::Failure>> {
        let mut ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        with_event_handlers(&mut ctx, handler);

        let task_config = TaskConfig::new(ctx.clone()).default_name("fetch");
        let task: Arc<Task<R::Value, R::Failure>> = Task::new(task_config, Vec::new());
        self.state.lock().register_task(task.clone());
        self.publish();

        let store = self.clone();
        let spawned_task = task.clone();
        tokio::spawn(async move {
            store.drive(spawned_task, ctx).await;
        });
        task
    }

    /// Thin wrapper over [`QueryStore::run`] with no overrides.
    pub async fn fetch(&self) -> Result<R::Value, OperationFailure<R::Failure>> {
        self.run(None, None).await
    }

    /// Restore to the seeded initial value, cancelling every task the
    /// state was holding (`spec.md` §4.6).
    pub fn reset_state(&self) {
        let effect = self.state.lock().reset();
        effect.apply();
        *self.auto_run_task.lock() = None;
        self.publish();
    }

    /// Write a result directly into state, as if a run had just
    /// produced it (`spec.md` §4.6).
    pub fn set_result(&self, result: Result<R::Value, R::Failure>, ctx_override: Option<Context>) {
        let ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        self.ingest(result, &ctx);
        self.publish();
    }

    /// Register a state-change handler. If this is the first subscriber
    /// and the store is both stale and allowed to auto-run, schedules an
    /// automatic run (`spec.md` §4.6).
    pub fn subscribe(self: &Arc<Self>, handler: StateChangeHandler) -> Subscription {
        let (id, count_before) = self.subscribers.add(handler);
        if count_before == 0 {
            let ctx = self.base_context.lock().clone();
            if is_stale(&ctx) && automatic_running_enabled(&ctx) {
                self.clone().schedule_automatic_run();
            }
        }
        let store = self.clone();
        Subscription::new(move || {
            let remaining = store.subscribers.remove(id);
            if remaining == 0 {
                store.cancel_automatic_run();
            }
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

    pub fn is_stale(&self) -> bool {
        is_stale(&self.base_context.lock())
    }

    pub fn context(&self) -> Context {
        self.base_context.lock().clone()
    }

    pub fn path(&self) -> &OperationPath {
        &self.path
    }

    /// Run `f` with exclusive access to the underlying state container,
    /// for callers that need more than the narrow accessors above
    /// (`spec.md` §4.6: `with_exclusive_access`).
    pub fn with_exclusive_access<T>(
        &self,
        f: impl FnOnce(&mut QueryState<R::Value, R::Failure>) -> T,
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

impl<R: Request> Drop for QueryStore<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<R: Request> std::fmt::Debug for QueryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStore")
            .field("path", &self.path)
            .field("subscribers", &self.subscribers.count())
            .field("loading", &self.state.lock().is_loading())
            .finish()
    }
}

impl<R: Request> AnyStore for QueryStore<R> {
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
impl<R: Request> ControlSink<R::Value, R::Failure> for QueryStore<R> {
    fn yield_now(&self, result: Result<R::Value, R::Failure>, context: Option<Context>) {
        self.set_result(result, context);
    }

    fn can_yield_refetch(&self) -> bool {
        automatic_running_enabled(&self.base_context.lock())
    }

    async fn yield_refetch(
        &self,
        context: Option<Context>,
    ) -> Option<Result<R::Value, R::Failure>> {
        if !self.can_yield_refetch() {
            return None;
        }
        match self.run(context, None).await {
            Ok(value) => Some(Ok(value)),
            Err(OperationFailure::Operation(error)) => Some(Err(error)),
            Err(OperationFailure::Cancelled) => None,
        }
    }

    fn context(&self) -> Context {
        self.context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::RequestExt;
    use crate::task::Isolation;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Answer(i32);

    #[async_trait]
    impl Request for Answer {
        type Value = i32;
        type Failure = String;

        async fn run(
            &self,
            _isolation: Isolation,
            _context: Context,
            _continuation: Continuation<Self::Value, Self::Failure>,
        ) -> Result<Self::Value, Self::Failure> {
            Ok(self.0)
        }
    }

    fn path() -> OperationPath {
        OperationPath::from_elements(["answer".into()])
    }

    #[tokio::test]
    async fn fetch_success_updates_state() {
        let store = QueryStore::new(Answer(42), None, Context::new(), path());
        let result = store.fetch().await;
        assert_eq!(result, Ok(42));
        assert_eq!(store.current_value(), Some(42));
        assert_eq!(store.state(), OperationStatus::Result(Ok(42)));
    }

    #[tokio::test]
    async fn reset_state_restores_initial_value() {
        let store = QueryStore::new(Answer(1), Some(0), Context::new(), path());
        store.fetch().await.unwrap();
        assert_eq!(store.current_value(), Some(1));
        store.reset_state();
        assert_eq!(store.current_value(), Some(0));
        assert_eq!(store.state(), OperationStatus::Idle);
    }

    #[tokio::test]
    async fn subscribe_triggers_automatic_run_when_stale_and_enabled() {
        use crate::modifier::auto_run::EnableAutomaticRunning;
        use crate::modifier::stale::StaleWhen;

        let request = Answer(7)
            .with_modifier(StaleWhen::new(|_| true))
            .with_modifier(EnableAutomaticRunning::always(true));
        let store = QueryStore::new(request, None, Context::new(), path());

        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = fired.clone();
        let _sub = store.subscribe(Arc::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..50 {
            if store.current_value() == Some(7) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.current_value(), Some(7));
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn last_unsubscribe_cancels_in_flight_automatic_run() {
        use crate::modifier::auto_run::EnableAutomaticRunning;
        use crate::modifier::stale::StaleWhen;

        struct Hang;

        #[async_trait]
        impl Request for Hang {
            type Value = i32;
            type Failure = String;

            async fn run(
                &self,
                isolation: Isolation,
                _context: Context,
                _continuation: Continuation<Self::Value, Self::Failure>,
            ) -> Result<Self::Value, Self::Failure> {
                isolation.cancelled().await;
                Err("should not reach".to_string())
            }
        }

        let request = Hang
            .with_modifier(StaleWhen::new(|_| true))
            .with_modifier(EnableAutomaticRunning::always(true));
        let store = QueryStore::new(request, None, Context::new(), path());

        let sub = store.subscribe(Arc::new(|| {}));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(store.is_loading());
        sub.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!store.is_loading());
    }
}
