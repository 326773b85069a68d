//! `Subscription` — a one-shot, idempotent cancel token.
//!
//! Mirrors the teacher's `CancellationManager` (`server/cancellation.rs`)
//! in spirit — a token that can be cancelled exactly once, safely from
//! any thread — but scoped to a single subscriber/run rather than a
//! request-id keyed map, and composable via [`Subscription::combined`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single idempotent cancel action.
///
/// Cloning a `Subscription` clones the handle, not the underlying action;
/// calling [`Subscription::cancel`] on any clone cancels all of them.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    action: parking_lot::Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Build a subscription whose cancel action runs `action` exactly
    /// once, the first time [`Subscription::cancel`] is called.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                action: parking_lot::Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A subscription whose cancellation does nothing.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Cancel this subscription. Safe to call more than once or from
    /// multiple threads; only the first call runs the action.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(action) = self.inner.action.lock().take() {
                action();
            }
        }
    }

    /// `true` once [`Subscription::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Combine several subscriptions into one; cancelling the combined
    /// subscription cancels each of `subscriptions` in order.
    pub fn combined(subscriptions: impl IntoIterator<Item = Subscription>) -> Subscription {
        let subs: Vec<Subscription> = subscriptions.into_iter().collect();
        Subscription::new(move || {
            for sub in subs {
                sub.cancel();
            }
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_runs_action_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        sub.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sub.is_cancelled());
    }

    #[test]
    fn combined_cancels_all_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for i in 0..3 {
            let order = order.clone();
            subs.push(Subscription::new(move || order.lock().push(i)));
        }
        let combined = Subscription::combined(subs);
        combined.cancel();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn clone_shares_cancellation() {
        let sub = Subscription::noop();
        let clone = sub.clone();
        clone.cancel();
        assert!(sub.is_cancelled());
    }
}
