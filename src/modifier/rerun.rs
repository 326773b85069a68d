//! `RerunOnChange(spec)` — records a run specification the store should
//! observe; when it transitions from unsatisfied to satisfied, the store
//! schedules a refetch (`spec.md` §4.1, "Automatic running" bullet 2).
//!
//! The modifier itself cannot reach the store (it runs at request-setup
//! time, before a store exists to own it), so it only registers the spec
//! in the context; [`crate::store::Store::new`] reads this list back and
//! does the actual `observe_changes` wiring.

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::run_spec::SharedRunSpec;
use crate::task::Isolation;
use async_trait::async_trait;

struct RerunSpecsKey;

impl ContextKey for RerunSpecsKey {
    type Value = Vec<SharedRunSpec>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

/// The run specifications a store should watch for false-to-true
/// transitions, in registration order.
pub fn rerun_specs(context: &Context) -> Vec<SharedRunSpec> {
    context.get::<RerunSpecsKey>()
}

pub struct RerunOnChange(pub SharedRunSpec);

#[async_trait]
impl<Base: Request> Modifier<Base> for RerunOnChange {
    fn setup(&self, context: &mut Context, base: &Base) {
        let mut specs = context.get::<RerunSpecsKey>();
        specs.push(self.0.clone());
        context.set::<RerunSpecsKey>(specs);
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
    use crate::run_spec::always;
    use std::sync::Arc;

    #[test]
    fn accumulates_in_registration_order() {
        let mut ctx = Context::new();
        let mut specs = ctx.get::<RerunSpecsKey>();
        specs.push(Arc::new(always(true)));
        ctx.set::<RerunSpecsKey>(specs);
        assert_eq!(rerun_specs(&ctx).len(), 1);
    }
}
