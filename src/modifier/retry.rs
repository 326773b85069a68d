//! `Retry(limit)` — re-invokes the base on failure, sleeping via the
//! context's delayer/backoff between attempts (`spec.md` §4.1, §8 "Retry
//! bound").
//!
//! Each attempt runs under its own context carrying `RetryIndexKey`: the
//! first attempt sees `None`, retry `k` (1-indexed) sees `Some(k - 1)`
//! (`spec.md` §9, the retry-index open question, resolved that way here).

use crate::context::{Context, RetryIndexKey};
use crate::continuation::Continuation;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use std::time::Instant;

/// Additive observability for a completed run: how many attempts it took
/// and how long it took in wall-clock time, independent of the logical
/// `Clock` a run's context carries. Not part of any typed `Result` — a
/// UI-binding layer's debug panel is the intended consumer (`SPEC_FULL.md`
/// §B, "RunOutcome").
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub attempts: u32,
    pub elapsed: std::time::Duration,
    pub succeeded: bool,
}

/// Retries the base up to `limit` times after an initial failure. The
/// base is invoked at most `limit + 1` times total; cancellation during
/// the inter-attempt sleep unwinds this future the same way it would any
/// other await point — the loop does not synthesize its own cancellation
/// failure, the base is expected to surface cooperative-cancel itself.
pub struct Retry {
    limit: u32,
}

impl Retry {
    /// Allow up to `limit` retries beyond the first attempt.
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl<Base: Request> Modifier<Base> for Retry {
    async fn run(
        &self,
        base: &Base,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Base::Value, Base::Failure>,
    ) -> Result<Base::Value, Base::Failure> {
        let started_at = Instant::now();
        let mut attempts_made: u32 = 0;
        loop {
            let retry_index = if attempts_made == 0 {
                None
            } else {
                Some(attempts_made - 1)
            };
            let mut attempt_context = context.clone();
            attempt_context.set::<RetryIndexKey>(retry_index);

            let result = base
                .run(isolation.clone(), attempt_context, continuation.clone())
                .await;

            if result.is_ok() || attempts_made >= self.limit {
                let outcome = RunOutcome {
                    attempts: attempts_made + 1,
                    elapsed: started_at.elapsed(),
                    succeeded: result.is_ok(),
                };
                tracing::debug!(?outcome, "run finished");
                return result;
            }

            let next_attempt_number = attempts_made + 1;
            let delay = context.backoff_function().delay_for_attempt(next_attempt_number);
            context.delayer().sleep(delay).await;
            attempts_made += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use crate::continuation::Continuation;
    use crate::delayer::NoDelay;
    use crate::modifier::RequestExt;
    use crate::task::{Isolation, Task, TaskConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FailTwiceThenSucceed {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Request for FailTwiceThenSucceed {
        type Value = &'static str;
        type Failure = &'static str;

        async fn run(
            &self,
            _isolation: Isolation,
            context: Context,
            _continuation: Continuation<Self::Value, Self::Failure>,
        ) -> Result<Self::Value, Self::Failure> {
            let mut attempts = self.attempts.lock();
            *attempts += 1;
            let observed = context.get::<RetryIndexKey>();
            match *attempts {
                1 => {
                    assert_eq!(observed, None);
                    Err("boom-1")
                }
                2 => {
                    assert_eq!(observed, Some(0));
                    Err("boom-2")
                }
                _ => {
                    assert_eq!(observed, Some(1));
                    Ok("ok")
                }
            }
        }
    }

    #[tokio::test]
    async fn retries_up_to_limit_then_succeeds() {
        let base = FailTwiceThenSucceed {
            attempts: Mutex::new(0),
        };
        let mut ctx = Context::new();
        ctx.set::<crate::context::DelayerKey>(Arc::new(NoDelay));
        let chained = base.with_modifier(Retry::new(2));
        chained.setup(&mut ctx);
        let isolation = Task::<&'static str, &'static str>::new(TaskConfig::new(ctx.clone()), vec![])
            .isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = chained.run(isolation, ctx, cont).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(*chained.base.attempts.lock(), 3);
    }

    struct AlwaysFails {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Request for AlwaysFails {
        type Value = ();
        type Failure = &'static str;

        async fn run(
            &self,
            _isolation: Isolation,
            _context: Context,
            _continuation: Continuation<Self::Value, Self::Failure>,
        ) -> Result<Self::Value, Self::Failure> {
            *self.attempts.lock() += 1;
            Err("nope")
        }
    }

    #[tokio::test]
    async fn stops_after_limit_plus_one_attempts() {
        let base = AlwaysFails {
            attempts: Mutex::new(0),
        };
        let mut ctx = Context::new();
        ctx.set::<crate::context::DelayerKey>(Arc::new(NoDelay));
        let chained = base.with_modifier(Retry::new(3));
        chained.setup(&mut ctx);
        let isolation = Task::<(), &'static str>::new(TaskConfig::new(ctx.clone()), vec![]).isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = chained.run(isolation, ctx, cont).await;
        assert_eq!(result, Err("nope"));
        assert_eq!(*chained.base.attempts.lock(), 4);
    }
}
