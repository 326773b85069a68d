//! Modifiers — the wrapping pattern that layers retry, backoff,
//! deduplication, staleness, automatic re-running, and event handling
//! around a base [`crate::request::Request`] (`spec.md` §4.1).
//!
//! Composition is linear and left-to-right, mirroring the teacher's own
//! `GenericTaskStore<B>` wrapping a dumb [`crate::request::Request`]-like
//! backend with domain logic on top: `Modified{base, modifier}` nests,
//! with the outermost modifier seeing a context only after every inner
//! modifier (and the base) has had a chance to prepare it.

pub mod auto_run;
pub mod backoff;
pub mod clock;
pub mod dedup;
pub mod default_value;
pub mod delayer;
pub mod events;
pub mod max_history;
pub mod rerun;
pub mod retry;
pub mod stale;

use crate::context::Context;
use crate::continuation::Continuation;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;

/// A behavior layered around a `Base` request.
#[async_trait]
pub trait Modifier<Base: Request>: Send + Sync + 'static {
    /// Prepare `context` before the store's first run. The default
    /// forwards to `base.setup` unmodified.
    fn setup(&self, context: &mut Context, base: &Base) {
        base.setup(context);
    }

    /// Decide whether and how to invoke `base.run`.
    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure>;
}

/// A request wrapped by a single modifier. Nest to compose:
/// `Modified { base: Modified { base: inner, modifier: Retry(3) }, modifier: Backoff(...) }`.
pub struct Modified<Base, M> {
    pub base: Base,
    pub modifier: M,
}

impl<Base, M> Modified<Base, M> {
    pub fn new(base: Base, modifier: M) -> Self {
        Self { base, modifier }
    }
}

#[async_trait]
impl<Base, M> Request for Modified<Base, M>
where
    Base: Request,
    M: Modifier<Base>,
{
    type Value = Base::Value;
    type Failure = Base::Failure;

    fn setup(&self, context: &mut Context) {
        self.modifier.setup(context, &self.base);
    }

    async fn run(
        &self,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.modifier
            .run(&self.base, isolation, context, continuation)
            .await
    }
}

/// Extension trait providing a fluent `.with_modifier(m)` syntax for
/// composing [`Modified`] wrappers, in construction order.
pub trait RequestExt: Request + Sized {
    fn with_modifier<M: Modifier<Self>>(self, modifier: M) -> Modified<Self, M> {
        Modified::new(self, modifier)
    }

    /// Deduplicate concurrent runs whose contexts satisfy `pred`
    /// (`spec.md` §4.2). See [`dedup::Deduplicated`] for why this isn't
    /// expressed as a [`Modifier`] like every other built-in.
    fn deduplicated(
        self,
        pred: impl Fn(&Context, &Context) -> bool + Send + Sync + 'static,
    ) -> dedup::Deduplicated<Self> {
        dedup::Deduplicated::new(self, pred)
    }
}

impl<R: Request> RequestExt for R {}
