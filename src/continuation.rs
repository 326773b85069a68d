//! `Continuation` — a sink allowing a running request body to yield
//! intermediate results before returning its terminal result.
//!
//! Every call is routed, while the run is still in progress, through the
//! enclosing modifier stack's event handlers and into state ingestion
//! (`spec.md` §4.9). The continuation itself never suspends — yielding is
//! fire-and-forget, matching the spec's "non-suspending" requirement.

use crate::context::Context;
use std::sync::Arc;

/// Why a result arrived at an event handler or state update: because the
/// request yielded an intermediate value, or because it returned its
/// terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultUpdateReason {
    /// Produced via [`Continuation::yield_value`]/[`Continuation::yield_error`]
    /// while the run is still in progress.
    YieldedResult,
    /// The terminal value returned by `Request::run`.
    ReturnedFinalResult,
}

/// A sink passed to a running request body. A request may call any
/// `yield_*` method any number of times before returning.
pub struct Continuation<V, E> {
    sink: Arc<dyn Fn(Result<V, E>, Context, ResultUpdateReason) + Send + Sync>,
    ctx: Context,
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Continuation<V, E> {
    /// Build a continuation whose yields are routed to `sink`.
    pub fn new(
        ctx: Context,
        sink: impl Fn(Result<V, E>, Context, ResultUpdateReason) + Send + Sync + 'static,
    ) -> Self {
        Self {
            sink: Arc::new(sink),
            ctx,
        }
    }

    /// Yield an intermediate success value.
    pub fn yield_value(&self, value: V) {
        self.yield_value_with_context(value, self.ctx.clone());
    }

    /// Yield an intermediate success value under an overridden context.
    pub fn yield_value_with_context(&self, value: V, ctx: Context) {
        (self.sink)(Ok(value), ctx, ResultUpdateReason::YieldedResult);
    }

    /// Yield an intermediate failure.
    pub fn yield_error(&self, error: E) {
        self.yield_error_with_context(error, self.ctx.clone());
    }

    /// Yield an intermediate failure under an overridden context.
    pub fn yield_error_with_context(&self, error: E, ctx: Context) {
        (self.sink)(Err(error), ctx, ResultUpdateReason::YieldedResult);
    }

    /// Yield an intermediate `Result` directly.
    pub fn yield_result(&self, result: Result<V, E>) {
        (self.sink)(result, self.ctx.clone(), ResultUpdateReason::YieldedResult);
    }
}

impl<V, E> Clone for Continuation<V, E> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_are_routed_with_reason() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cont: Continuation<i32, String> = Continuation::new(Context::new(), move |r, _ctx, reason| {
            seen2.lock().push((r, reason));
        });
        cont.yield_value(1);
        cont.yield_error("boom".to_string());
        let log = seen.lock();
        assert_eq!(log[0], (Ok(1), ResultUpdateReason::YieldedResult));
        assert_eq!(
            log[1],
            (Err("boom".to_string()), ResultUpdateReason::YieldedResult)
        );
    }
}
