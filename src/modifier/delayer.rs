//! `Delayer(d)` — overrides `context.delayer` for this request (`spec.md` §4.1).

use crate::context::{Context, DelayerKey};
use crate::continuation::Continuation;
use crate::delayer::SharedDelayer;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;

pub struct Delayer(pub SharedDelayer);

#[async_trait]
impl<Base: Request> Modifier<Base> for Delayer {
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<DelayerKey>(self.0.clone());
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<DelayerKey>(self.0.clone());
        base.run(isolation, context, continuation).await
    }
}
