//! `Backoff(fn)` — installs the backoff function [`crate::modifier::retry::Retry`]
//! reads when computing a sleep between attempts (`spec.md` §4.1).

use crate::backoff::BackoffFunction;
use crate::context::{BackoffFunctionKey, Context};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;

pub struct Backoff(pub BackoffFunction);

#[async_trait]
impl<Base: Request> Modifier<Base> for Backoff {
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<BackoffFunctionKey>(self.0.clone());
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<BackoffFunctionKey>(self.0.clone());
        base.run(isolation, context, continuation).await
    }
}
