//! Pluggable sleep primitive.
//!
//! The retry modifier never calls `tokio::time::sleep` directly; it goes
//! through [`Delayer`] so that tests can install [`NoDelay`] and run
//! backoff-heavy scenarios instantly, the way the teacher's
//! `ReconnectManager` takes its delay as a `Duration` value rather than
//! hard-coding `tokio::time::sleep` at the call site.

use crate::duration::Duration;
use async_trait::async_trait;
use std::sync::Arc;

/// A sleep primitive. Must be cancellation-safe: an awaited `sleep` is a
/// suspension point per `spec.md` §5, and cancelling the enclosing task
/// must unwind the sleep rather than leaving it pending.
#[async_trait]
pub trait Delayer: Send + Sync + std::fmt::Debug {
    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Type-erased, cloneable handle to a delayer, stored in
/// [`crate::context::Context`].
pub type SharedDelayer = Arc<dyn Delayer>;

/// Sleeps using `tokio::time::sleep`. The default delayer for real runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSleepDelayer;

#[async_trait]
impl Delayer for TaskSleepDelayer {
    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::time::sleep(duration.to_std()).await;
    }
}

/// Never actually sleeps; returns immediately. Installed by the test
/// store-creator policy (`spec.md` §6, "Defaults policy") so retry/backoff
/// scenarios run at full speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Delayer for NoDelay {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

/// Adapts any `Fn(Duration) -> Fut` closure into a [`Delayer`], for tests
/// that want to observe or count sleep calls without a trait impl.
pub struct FnDelayer<F> {
    sleep_fn: F,
}

impl<F> std::fmt::Debug for FnDelayer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDelayer").finish_non_exhaustive()
    }
}

impl<F, Fut> FnDelayer<F>
where
    F: Fn(Duration) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    /// Build a delayer from an async closure.
    pub fn new(sleep_fn: F) -> Self {
        Self { sleep_fn }
    }
}

#[async_trait]
impl<F, Fut> Delayer for FnDelayer<F>
where
    F: Fn(Duration) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn sleep(&self, duration: Duration) {
        (self.sleep_fn)(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn no_delay_returns_immediately() {
        let start = std::time::Instant::now();
        NoDelay.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() < std::time::Duration::from_millis(200));
    }

    #[tokio::test]
    async fn fn_delayer_observes_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let delayer = FnDelayer::new(move |_d| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        delayer.sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
