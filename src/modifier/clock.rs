//! `Clock(c)` — overrides `context.clock` for this request (`spec.md` §4.1).

use crate::clock::SharedClock;
use crate::context::{ClockKey, Context};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;

pub struct Clock(pub SharedClock);

#[async_trait]
impl<Base: Request> Modifier<Base> for Clock {
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<ClockKey>(self.0.clone());
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<ClockKey>(self.0.clone());
        base.run(isolation, context, continuation).await
    }
}
