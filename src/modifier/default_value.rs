//! `DefaultValue(v)` — presents `v` whenever the inner state has no
//! value yet (`spec.md` §4.1). Implemented as a context override the
//! store's `current_value()` consults, rather than a state-level
//! wrapper, since the underlying state containers are otherwise
//! unopinionated about presentation.

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use std::marker::PhantomData;

struct DefaultValueKey<V>(PhantomData<V>);

impl<V: Clone + Send + Sync + 'static> ContextKey for DefaultValueKey<V> {
    type Value = Option<V>;

    fn default_value() -> Self::Value {
        None
    }
}

/// The default value installed by [`DefaultValue`], if any.
pub fn default_value<V: Clone + Send + Sync + 'static>(context: &Context) -> Option<V> {
    context.get::<DefaultValueKey<V>>()
}

pub struct DefaultValue<V>(pub V);

#[async_trait]
impl<Base> Modifier<Base> for DefaultValue<Base::Value>
where
    Base: Request,
{
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<DefaultValueKey<Base::Value>>(Some(self.0.clone()));
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<DefaultValueKey<Base::Value>>(Some(self.0.clone()));
        base.run(isolation, context, continuation).await
    }
}
