//! `Controller` — an external driver of a store's state, independent of
//! any particular run (`spec.md` §4.8).
//!
//! A controller is installed once (via [`InstallController`], at request
//! setup time) and handed a [`Controls`] handle once a store exists to
//! back it. It can push values/errors into the store's state directly
//! (`Controls::yield_value`/`yield_error`/`yield_result`, e.g. from a
//! websocket push) or ask the store to run a real refetch on its behalf
//! (`Controls::yield_refetch`, gated by whether automatic running is
//! currently enabled — `spec.md` §4.6, "Automatic running" bullet 3). The
//! [`crate::subscription::Subscription`] `control` returns is cancelled
//! when the owning store is dropped.

use crate::context::{Context, ContextKey};
use crate::modifier::Modifier;
use crate::request::Request;
use crate::subscription::Subscription;
use crate::task::Isolation;
use crate::continuation::Continuation;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// The store-side surface a [`Controls`] handle talks to. Implemented by
/// `crate::store::Store`; kept as a small object-safe trait so `Controls`
/// doesn't need to know the store's full state-container type.
#[async_trait]
pub trait ControlSink<V, E>: Send + Sync {
    /// Push a result directly into the store's state, as if a run had
    /// just produced it.
    fn yield_now(&self, result: Result<V, E>, context: Option<Context>);

    /// `true` if automatic running is currently enabled for this store
    /// (`spec.md` §4.6).
    fn can_yield_refetch(&self) -> bool;

    /// Ask the store to perform a real refetch, returning its result —
    /// or `None` if automatic running is disabled, in which case nothing
    /// ran.
    async fn yield_refetch(&self, context: Option<Context>) -> Option<Result<V, E>>;

    /// The store's current base context.
    fn context(&self) -> Context;
}

/// The handle a running [`Controller`] uses to drive its store.
pub struct Controls<V, E> {
    sink: Weak<dyn ControlSink<V, E>>,
}

impl<V, E> Clone for Controls<V, E> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
        }
    }
}

impl<V, E> Controls<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(sink: Weak<dyn ControlSink<V, E>>) -> Self {
        Self { sink }
    }

    /// Push a success value directly into the store's state.
    pub fn yield_value(&self, value: V) {
        self.yield_result(Ok(value), None);
    }

    /// Push a success value under an overridden context.
    pub fn yield_value_with_context(&self, value: V, context: Context) {
        self.yield_result(Ok(value), Some(context));
    }

    /// Push a failure directly into the store's state.
    pub fn yield_error(&self, error: E) {
        self.yield_result(Err(error), None);
    }

    /// Push a result directly into the store's state, optionally under an
    /// overridden context. A no-op if the store has already been dropped.
    pub fn yield_result(&self, result: Result<V, E>, context: Option<Context>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.yield_now(result, context);
        }
    }

    /// `true` if the store would currently allow [`Controls::yield_refetch`]
    /// to actually run something.
    pub fn can_yield_refetch(&self) -> bool {
        self.sink
            .upgrade()
            .map(|sink| sink.can_yield_refetch())
            .unwrap_or(false)
    }

    /// Ask the store to perform a real refetch. Returns `None` if the
    /// store is gone or automatic running is disabled.
    pub async fn yield_refetch(&self, context: Option<Context>) -> Option<Result<V, E>> {
        let sink = self.sink.upgrade()?;
        sink.yield_refetch(context).await
    }

    /// The store's current base context, if the store is still alive.
    pub fn context(&self) -> Option<Context> {
        self.sink.upgrade().map(|sink| sink.context())
    }
}

/// A long-lived external driver of a store's state (`spec.md` §4.8).
pub trait Controller<V, E>: Send + Sync + 'static {
    /// Start controlling. Typically spawns a task that calls back into
    /// `controls` over time. The returned subscription, when cancelled,
    /// should stop that task.
    fn control(&self, controls: Controls<V, E>) -> Subscription;
}

struct ControllersKey<V, E>(PhantomData<(V, E)>);

impl<V, E> ContextKey for ControllersKey<V, E>
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    type Value = Vec<Arc<dyn Controller<V, E>>>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

/// The controllers registered via [`InstallController`], in registration
/// order. Read by `crate::store::Store::new` to start each one once the
/// store exists.
pub fn controllers<V, E>(context: &Context) -> Vec<Arc<dyn Controller<V, E>>>
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    context.get::<ControllersKey<V, E>>()
}

/// Registers a [`Controller`] to be started once the owning store exists.
pub struct InstallController<V, E>(pub Arc<dyn Controller<V, E>>);

impl<V, E> InstallController<V, E>
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    pub fn new(controller: impl Controller<V, E>) -> Self {
        Self(Arc::new(controller))
    }
}

#[async_trait]
impl<Base> Modifier<Base> for InstallController<Base::Value, Base::Failure>
where
    Base: Request,
{
    fn setup(&self, context: &mut Context, base: &Base) {
        let mut installed = context.get::<ControllersKey<Base::Value, Base::Failure>>();
        installed.push(self.0.clone());
        context.set::<ControllersKey<Base::Value, Base::Failure>>(installed);
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        base.run(isolation, context, continuation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeSink {
        pushed: Mutex<Vec<i32>>,
        enabled: bool,
    }

    #[async_trait]
    impl ControlSink<i32, String> for FakeSink {
        fn yield_now(&self, result: Result<i32, String>, _context: Option<Context>) {
            if let Ok(v) = result {
                self.pushed.lock().push(v);
            }
        }

        fn can_yield_refetch(&self) -> bool {
            self.enabled
        }

        async fn yield_refetch(&self, _context: Option<Context>) -> Option<Result<i32, String>> {
            if self.enabled {
                Some(Ok(99))
            } else {
                None
            }
        }

        fn context(&self) -> Context {
            Context::new()
        }
    }

    #[tokio::test]
    async fn yield_value_reaches_sink_while_alive() {
        let sink: Arc<dyn ControlSink<i32, String>> = Arc::new(FakeSink {
            pushed: Mutex::new(Vec::new()),
            enabled: true,
        });
        let controls = Controls::new(Arc::downgrade(&sink));
        controls.yield_value(5);
        assert!(controls.can_yield_refetch());
        assert_eq!(controls.yield_refetch(None).await, Some(Ok(99)));
    }

    #[tokio::test]
    async fn dropped_store_makes_controls_inert() {
        let sink: Arc<dyn ControlSink<i32, String>> = Arc::new(FakeSink {
            pushed: Mutex::new(Vec::new()),
            enabled: true,
        });
        let controls = Controls::new(Arc::downgrade(&sink));
        drop(sink);
        controls.yield_value(5);
        assert!(!controls.can_yield_refetch());
        assert_eq!(controls.yield_refetch(None).await, None);
    }
}
