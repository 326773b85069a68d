//! `MaxHistoryLength(n)` — clamps a mutation's history length
//! (`spec.md` §4.1: "panic/precondition if n ≤ 0").

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;

pub struct MaxHistoryLengthKey;

impl ContextKey for MaxHistoryLengthKey {
    type Value = usize;

    fn default_value() -> Self::Value {
        25
    }
}

/// The configured history capacity (default 25, matching a generous but
/// bounded default rather than "unlimited").
pub fn max_history_length(context: &Context) -> usize {
    context.get::<MaxHistoryLengthKey>()
}

pub struct MaxHistoryLength(pub usize);

impl MaxHistoryLength {
    /// Panics if `n == 0`, per `spec.md` §4.1.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "MaxHistoryLength must be greater than zero");
        Self(n)
    }
}

#[async_trait]
impl<Base: Request> Modifier<Base> for MaxHistoryLength {
    fn setup(&self, context: &mut Context, base: &Base) {
        context.set::<MaxHistoryLengthKey>(self.0);
        base.setup(context);
    }

    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        mut context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        context.set::<MaxHistoryLengthKey>(self.0);
        base.run(isolation, context, continuation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn rejects_zero() {
        MaxHistoryLength::new(0);
    }
}
