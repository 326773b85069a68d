//! `EnableAutomaticRunning(spec)` — gates whether the store may schedule
//! a run on its own (first subscribe while stale, a rerun-on-change
//! transition, or a controller's `yield_refetch`) rather than only in
//! response to an explicit caller call (`spec.md` §4.1, §4.6).

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::run_spec::{always, RunSpecification, SharedRunSpec};
use crate::task::Isolation;
use async_trait::async_trait;
use std::sync::Arc;

struct AutomaticRunningKey;

impl ContextKey for AutomaticRunningKey {
    type Value = SharedRunSpec;

    fn default_value() -> Self::Value {
        Arc::new(always(false))
    }
}

/// `true` if automatic running is currently enabled for this context.
pub fn automatic_running_enabled(context: &Context) -> bool {
    context.get::<AutomaticRunningKey>().is_satisfied(context)
}

pub struct EnableAutomaticRunning(pub SharedRunSpec);

impl EnableAutomaticRunning {
    pub fn always(enabled: bool) -> Self {
        Self(Arc::new(always(enabled)))
    }
}

#[async_trait]
impl<Base: Request> Modifier<Base> for EnableAutomaticRunning {
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<AutomaticRunningKey>(self.0.clone());
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<AutomaticRunningKey>(self.0.clone());
        base.run(isolation, context, continuation).await
    }
}
