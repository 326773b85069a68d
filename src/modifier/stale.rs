//! `StaleWhen(pred)` — appends a staleness predicate to a chain carried
//! in the context; `is_stale` is the logical OR of every predicate
//! appended so far (`spec.md` §4.1).

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use std::sync::Arc;

/// A single staleness predicate.
pub type StalePredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

struct StalePredicatesKey;

impl ContextKey for StalePredicatesKey {
    type Value = Vec<StalePredicate>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

/// `true` if any predicate installed via [`StaleWhen`] is satisfied.
/// Used by [`crate::store::Store::is_stale`].
pub fn is_stale(context: &Context) -> bool {
    context
        .get::<StalePredicatesKey>()
        .iter()
        .any(|predicate| predicate(context))
}

pub struct StaleWhen(pub StalePredicate);

impl StaleWhen {
    pub fn new(predicate: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }
}

#[async_trait]
impl<Base: Request> Modifier<Base> for StaleWhen {
    fn setup(&self, context: &mut Context, base: &Base) {
        let mut predicates = context.get::<StalePredicatesKey>();
        predicates.push(self.0.clone());
        context.set::<StalePredicatesKey>(predicates);
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
