//! Backoff functions — constant, linear, exponential, Fibonacci, and
//! jittered variants.
//!
//! The formulas mirror `ReconnectManager::calculate_delay` in the
//! teacher's `shared/reconnect.rs` (exponential growth, capped, with a
//! jitter term), generalized into a pluggable `Fn(attempt) -> Duration`
//! so the retry modifier (`src/modifier/retry.rs`) never hard-codes a
//! growth curve.

use crate::duration::Duration;
use rand::RngCore;
use std::sync::Arc;

/// A backoff function: given a 1-indexed attempt number, returns how long
/// to wait before the next attempt. Cloneable and storable in
/// [`crate::context::Context`].
#[derive(Clone)]
pub struct BackoffFunction {
    compute: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl std::fmt::Debug for BackoffFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffFunction").finish_non_exhaustive()
    }
}

impl BackoffFunction {
    /// Build a backoff function from a raw closure.
    pub fn from_fn(compute: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            compute: Arc::new(compute),
        }
    }

    /// Evaluate the delay for `attempt` (1-indexed: the first retry is
    /// attempt 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        (self.compute)(attempt)
    }

    /// Never wait.
    pub fn no_backoff() -> Self {
        Self::from_fn(|_attempt| Duration::ZERO)
    }

    /// Always wait `duration`, regardless of attempt number.
    pub fn constant(duration: Duration) -> Self {
        Self::from_fn(move |_attempt| duration)
    }

    /// Wait `duration * attempt`.
    pub fn linear(duration: Duration) -> Self {
        Self::from_fn(move |attempt| duration.saturating_mul(i64::from(attempt)))
    }

    /// Wait `duration * 2^(attempt - 1)`.
    pub fn exponential(duration: Duration) -> Self {
        Self::from_fn(move |attempt| {
            let exponent = attempt.saturating_sub(1).min(62);
            let factor = 1i64.checked_shl(exponent).unwrap_or(i64::MAX);
            duration.saturating_mul(factor)
        })
    }

    /// Wait `duration * fib(attempt)`, with `fib(1) = fib(2) = 1`.
    pub fn fibonacci(duration: Duration) -> Self {
        Self::from_fn(move |attempt| duration.saturating_mul(fib(attempt)))
    }

    /// Wrap `self`, replacing its delay with a uniform random value in
    /// `[0, self(attempt))`, drawn from `rng`.
    pub fn jittered(self, rng: Arc<parking_lot::Mutex<dyn RngCore + Send>>) -> Self {
        Self::from_fn(move |attempt| {
            let upper = self.delay_for_attempt(attempt);
            let mut guard = rng.lock();
            upper.random_up_to(&mut *guard)
        })
    }
}

fn fib(n: u32) -> i64 {
    if n == 0 {
        return 0;
    }
    let (mut a, mut b) = (0i64, 1i64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}
