//! S2 (retry with exponential backoff) and S3 (deduplication of
//! concurrent fetches) driven through the public modifier-composition
//! API, the way a consumer builds a custom request chain outside of
//! `Client`'s default policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use operon::backoff::BackoffFunction;
use operon::context::{Context, ContextKey, DelayerKey, RetryIndexKey};
use operon::continuation::Continuation;
use operon::delayer::NoDelay;
use operon::duration::Duration;
use operon::modifier::backoff::Backoff;
use operon::modifier::retry::Retry;
use operon::modifier::RequestExt;
use operon::request::Request;
use operon::task::{Isolation, Task, TaskConfig};

struct FlakyThreeTimes {
    attempts: Arc<AtomicU32>,
    observed_retry_indices: Arc<parking_lot::Mutex<Vec<Option<u32>>>>,
}

#[async_trait]
impl Request for FlakyThreeTimes {
    type Value = &'static str;
    type Failure = &'static str;

    async fn run(
        &self,
        _isolation: Isolation,
        context: Context,
        _continuation: Continuation<&'static str, &'static str>,
    ) -> Result<&'static str, &'static str> {
        self.observed_retry_indices
            .lock()
            .push(context.get::<RetryIndexKey>());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            Err("still failing")
        } else {
            Ok("succeeded")
        }
    }
}

#[tokio::test]
async fn s2_retry_with_exponential_backoff_sequences_the_retry_index() {
    let attempts = Arc::new(AtomicU32::new(0));
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = FlakyThreeTimes {
        attempts: attempts.clone(),
        observed_retry_indices: observed.clone(),
    }
    .with_modifier(Retry::new(5))
    .with_modifier(Backoff(BackoffFunction::exponential(Duration::from_millis(1))));

    let mut ctx = Context::new();
    ctx.set::<DelayerKey>(Arc::new(NoDelay));
    request.setup(&mut ctx);

    let task = Task::<&'static str, &'static str>::new(TaskConfig::new(ctx.clone()), vec![]);
    let cont = Continuation::new(ctx.clone(), |_, _, _| {});
    let result = request.run(task.isolation(), ctx, cont).await;

    assert_eq!(result, Ok("succeeded"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        observed.lock().clone(),
        vec![None, Some(0), Some(1)],
        "first attempt sees no retry index; retry k (1-indexed) sees Some(k-1)"
    );
}

struct SlowIncrement {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Request for SlowIncrement {
    type Value = u32;
    type Failure = String;

    async fn run(
        &self,
        _isolation: Isolation,
        _context: Context,
        _continuation: Continuation<u32, String>,
    ) -> Result<u32, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        Ok(n)
    }
}

#[tokio::test]
async fn s3_concurrent_fetches_with_the_same_context_share_one_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let deduped = SlowIncrement {
        calls: calls.clone(),
    }
    .deduplicated(|_, _| true);

    let ctx = Context::new();
    let run_once = |d: operon::modifier::dedup::Deduplicated<SlowIncrement>, ctx: Context| async move {
        let task: Arc<Task<u32, String>> = Task::new(TaskConfig::new(ctx.clone()), vec![]);
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        d.run(task.isolation(), ctx, cont).await
    };

    let (a, b, c) = tokio::join!(
        run_once(deduped.clone(), ctx.clone()),
        run_once(deduped.clone(), ctx.clone()),
        run_once(deduped.clone(), ctx.clone()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1, "only one execution should run");
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(a, b);
    assert_eq!(b, c);
}
