//! `HandleEvents(handler)` — observes a run's lifecycle without altering
//! its outcome (`spec.md` §4.1, §4.9).
//!
//! `on_run_started` fires before the base runs, `on_result_received`
//! fires for every yielded or terminal result (tagged with its
//! [`ResultUpdateReason`]), and `on_run_ended` always fires on exit. The
//! store installs one of these around the request chain at the point
//! immediately inside deduplication, so concurrent callers that attach to
//! an already-running execution do not each produce their own bracket —
//! only the run that actually reaches the base does (`spec.md` §8,
//! scenario S3: exactly one `RunStarted`/final `on_result_received`/
//! `RunEnded` regardless of how many callers were waiting on it).

use crate::context::{Context, ContextKey};
use crate::continuation::{Continuation, ResultUpdateReason};
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// The callbacks a [`HandleEvents`] modifier (or a store's internal
/// per-call bracket) dispatches to.
pub struct EventHandlers<V, E> {
    pub on_run_started: Option<Arc<dyn Fn(&Context) + Send + Sync>>,
    pub on_result_received: Option<Arc<dyn Fn(&Result<V, E>, &Context, ResultUpdateReason) + Send + Sync>>,
    pub on_run_ended: Option<Arc<dyn Fn(&Context) + Send + Sync>>,
}

impl<V, E> Default for EventHandlers<V, E> {
    fn default() -> Self {
        Self {
            on_run_started: None,
            on_result_received: None,
            on_run_ended: None,
        }
    }
}

struct EventHandlersKey<V, E>(PhantomData<(V, E)>);

impl<V: Send + Sync + Clone + 'static, E: Send + Sync + Clone + 'static> ContextKey for EventHandlersKey<V, E> {
    type Value = Option<Arc<EventHandlers<V, E>>>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Install the handler set a run should dispatch to.
pub fn with_event_handlers<V, E>(context: &mut Context, handlers: Option<Arc<EventHandlers<V, E>>>)
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    context.set::<EventHandlersKey<V, E>>(handlers);
}

/// Read back the handler set installed by [`with_event_handlers`], if any.
pub fn event_handlers<V, E>(context: &Context) -> Option<Arc<EventHandlers<V, E>>>
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    context.get::<EventHandlersKey<V, E>>()
}

/// Dispatch `result` to the currently-installed handler's
/// `on_result_received`, if one is set. Used both by
/// [`HandleEventsModifier::run`]'s terminal dispatch and by the store's
/// continuation sink for intermediate yields, so both paths share one
/// source of truth for "who is listening right now".
pub fn dispatch_result<V, E>(context: &Context, result: &Result<V, E>, reason: ResultUpdateReason)
where
    V: Send + Sync + Clone + 'static,
    E: Send + Sync + Clone + 'static,
{
    if let Some(handlers) = event_handlers::<V, E>(context) {
        if let Some(callback) = &handlers.on_result_received {
            callback(result, context, reason);
        }
    }
}

/// A modifier that installs a fixed handler set for the lifetime of the
/// request it wraps, bracketing every run with `on_run_started`/
/// `on_run_ended` and routing every result through `on_result_received`.
///
/// Most callers don't reach for this directly — the store installs its
/// own context-driven bracket (see `crate::store`) so the per-call
/// handler passed to `Store::run` can vary without rebuilding the
/// request's modifier chain. `HandleEvents` is the version a caller
/// composes by hand when a fixed handler set should apply to every run of
/// a request, regardless of which store or caller drives it.
pub struct HandleEvents<V, E> {
    handlers: Arc<EventHandlers<V, E>>,
}

impl<V, E> HandleEvents<V, E> {
    pub fn new(handlers: EventHandlers<V, E>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }
}

#[async_trait]
impl<Base> Modifier<Base> for HandleEvents<Base::Value, Base::Failure>
where
    Base: Request,
{
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<EventHandlersKey<Base::Value, Base::Failure>>(Some(self.handlers.clone()));
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<EventHandlersKey<Base::Value, Base::Failure>>(Some(self.handlers.clone()));
        if let Some(callback) = &self.handlers.on_run_started {
            callback(&context);
        }
        let result = base.run(isolation, context.clone(), continuation).await;
        dispatch_result(&context, &result, ResultUpdateReason::ReturnedFinalResult);
        if let Some(callback) = &self.handlers.on_run_ended {
            callback(&context);
        }
        result
    }
}

/// Installed once, store-side, directly inside `Deduplicated` (closer to
/// the base than dedup, but outside `Retry`/`Backoff`). Unlike
/// [`HandleEvents`], it carries no fixed handler set of its own — at run
/// time it reads back whatever handlers the *current* run's context
/// carries, set per call by `crate::store::Store` via
/// [`with_event_handlers`] before the chain runs. Concurrent callers each
/// supply their own handlers, but only the run that actually reaches the
/// base — the dedup owner — ever calls into this modifier, so exactly one
/// bracket fires per coalesced execution regardless of how many callers
/// were attached to it.
pub struct EventBracket<V, E>(PhantomData<(V, E)>);

impl<V, E> EventBracket<V, E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V, E> Default for EventBracket<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Base> Modifier<Base> for EventBracket<Base::Value, Base::Failure>
where
    Base: Request,
{
    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        let handlers = event_handlers::<Base::Value, Base::Failure>(&context);
        if let Some(callback) = handlers.as_ref().and_then(|h| h.on_run_started.as_ref()) {
            callback(&context);
        }
        let result = base.run(isolation, context.clone(), continuation).await;
        dispatch_result(&context, &result, ResultUpdateReason::ReturnedFinalResult);
        if let Some(callback) = handlers.as_ref().and_then(|h| h.on_run_ended.as_ref()) {
            callback(&context);
        }
        result
    }
}
