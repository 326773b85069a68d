//! Clock abstraction — system, frozen, and custom time sources.
//!
//! Every [`crate::context::Context`] carries a [`Clock`] (default:
//! [`SystemClock`]) so that state timestamps (`value_last_updated_at`,
//! `error_last_updated_at`) and backoff scheduling can be driven by a
//! deterministic source in tests, the way the teacher's `TaskRecord`
//! computes `expires_at` from `Utc::now()` but a test harness would want
//! to pin that call.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current time according to this clock.
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock, backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, constructed directly from a date.
///
/// Every call to [`Clock::now`] returns the same `DateTime<Utc>`. Use
/// [`time_freeze`] to construct one.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Construct a clock fixed at `date`.
pub fn time_freeze(date: DateTime<Utc>) -> FixedClock {
    FixedClock(date)
}

/// A clock backed by an arbitrary closure. Useful for advancing a shared
/// counter across a test.
#[derive(Clone)]
pub struct CustomClock {
    now_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl std::fmt::Debug for CustomClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomClock").finish_non_exhaustive()
    }
}

impl CustomClock {
    /// Construct a clock from any `Fn() -> DateTime<Utc>`.
    pub fn new(now_fn: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            now_fn: Arc::new(now_fn),
        }
    }
}

impl Clock for CustomClock {
    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }
}

/// Wraps any clock, capturing its first `now()` call and returning that
/// value forever after — i.e. "freeze whatever time it is right now".
#[derive(Debug, Clone)]
pub struct Frozen {
    at: DateTime<Utc>,
}

impl Frozen {
    /// Freeze `clock` at its current reading.
    pub fn capture(clock: &dyn Clock) -> Self {
        Self { at: clock.now() }
    }
}

impl Clock for Frozen {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}

/// Freeze any clock at its current reading. Equivalent to
/// `Frozen::capture(&clock)` but reads better at call sites:
/// `frozen(SystemClock)`.
pub fn frozen(clock: impl Clock + 'static) -> Frozen {
    Frozen::capture(&clock)
}

/// Type-erased, cloneable handle to a clock, stored in [`crate::context::Context`].
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_always_same() {
        let now = Utc::now();
        let clock = time_freeze(now);
        assert_eq!(clock.now(), now);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn frozen_captures_once() {
        let frozen_clock = frozen(SystemClock);
        let a = frozen_clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = frozen_clock.now();
        assert_eq!(a, b);
    }

    #[test]
    fn custom_clock_calls_closure() {
        let counter = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let c = counter.clone();
        let clock = CustomClock::new(move || {
            let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Utc::now() + chrono::Duration::seconds(n)
        });
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
