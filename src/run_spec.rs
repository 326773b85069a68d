//! Run specifications — predicates-with-change-notification driving
//! automatic re-runs and staleness.
//!
//! A [`RunSpecification`] is more than a `Fn(&Context) -> bool`: it can
//! also notify a caller when its answer *changes*, which is what lets
//! [`crate::modifier::rerun::RerunOnChange`] schedule a refetch on a
//! false-to-true transition instead of polling. Built-ins are combined
//! with `&`, `|`, and `!`, following the teacher's preference for small
//! composable trait objects over a monolithic policy struct (see
//! `ReconnectConfig`'s independent, combinable knobs).

use crate::context::Context;
use parking_lot::Mutex;
use std::sync::Arc;

/// A subscription to "this spec's answer changed". Dropping the guard
/// does not unsubscribe; call `cancel()` (via the returned
/// [`crate::subscription::Subscription`]) explicitly.
pub type ChangeCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// A predicate over a run's [`Context`] that can notify observers when
/// its value changes.
pub trait RunSpecification: Send + Sync {
    /// The current value of the predicate.
    fn is_satisfied(&self, ctx: &Context) -> bool;

    /// Register `callback` to be invoked with the new value whenever this
    /// spec's answer changes. Returns a subscription cancelling the
    /// observation. The default implementation never fires (a spec with
    /// no natural change signal, e.g. [`Always`]).
    fn observe_changes(&self, _callback: ChangeCallback) -> crate::subscription::Subscription {
        crate::subscription::Subscription::noop()
    }
}

/// Always returns a fixed boolean; never notifies of a change (it can't
/// change).
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

impl RunSpecification for Always {
    fn is_satisfied(&self, _ctx: &Context) -> bool {
        self.0
    }
}

/// Construct an always-`value` spec.
pub fn always(value: bool) -> Always {
    Always(value)
}

/// A spec whose value tracks an external boolean published through a
/// `tokio::sync::watch` channel — the shape platform signal adapters
/// (network-online, app-active) are expected to use.
pub struct Observing {
    initial: bool,
    receiver: tokio::sync::watch::Receiver<bool>,
}

impl Observing {
    /// Build a spec observing `receiver`, reporting `initial` until the
    /// channel produces its first value.
    pub fn new(receiver: tokio::sync::watch::Receiver<bool>, initial: bool) -> Self {
        Self { initial, receiver }
    }
}

impl RunSpecification for Observing {
    fn is_satisfied(&self, _ctx: &Context) -> bool {
        *self.receiver.borrow()
    }

    fn observe_changes(&self, callback: ChangeCallback) -> crate::subscription::Subscription {
        let mut rx = self.receiver.clone();
        let mut previous = self.initial;
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let value = *rx.borrow();
                if value != previous {
                    previous = value;
                    callback(value);
                }
            }
        });
        crate::subscription::Subscription::new(move || handle.abort())
    }
}

/// Observe a watch channel as a run specification.
pub fn observing(receiver: tokio::sync::watch::Receiver<bool>, initial: bool) -> Observing {
    Observing::new(receiver, initial)
}

/// Subscribe to both `a` and `b`, tracking each side's last-known value
/// and recomputing `combine(a, b)` on every change from either side.
/// Fires `callback` only when the combined value actually flips, not on
/// every underlying change (e.g. the side that's already satisfied
/// toggling while an AND is still held false by the other side).
///
/// Each side's baseline is taken via `is_satisfied(&Context::new())`; the
/// built-in specs combinators are meant to wrap (`Observing`, `Always`,
/// and combinations thereof), none of which read anything from the
/// context they're passed.
fn observe_combined<A, B>(
    a: &A,
    b: &B,
    callback: ChangeCallback,
    combine: impl Fn(bool, bool) -> bool + Send + Sync + 'static,
) -> crate::subscription::Subscription
where
    A: RunSpecification,
    B: RunSpecification,
{
    let baseline = Context::new();
    let state = Arc::new(Mutex::new((
        a.is_satisfied(&baseline),
        b.is_satisfied(&baseline),
    )));
    let combine = Arc::new(combine);
    let previous = Arc::new(Mutex::new(combine(state.lock().0, state.lock().1)));

    let state_a = state.clone();
    let previous_a = previous.clone();
    let combine_a = combine.clone();
    let callback_a = callback.clone();
    let sub_a = a.observe_changes(Arc::new(move |value| {
        let combined = {
            let mut guard = state_a.lock();
            guard.0 = value;
            combine_a(guard.0, guard.1)
        };
        let mut prev = previous_a.lock();
        if *prev != combined {
            *prev = combined;
            callback_a(combined);
        }
    }));

    let state_b = state;
    let previous_b = previous;
    let combine_b = combine;
    let sub_b = b.observe_changes(Arc::new(move |value| {
        let combined = {
            let mut guard = state_b.lock();
            guard.1 = value;
            combine_b(guard.0, guard.1)
        };
        let mut prev = previous_b.lock();
        if *prev != combined {
            *prev = combined;
            callback(combined);
        }
    }));

    crate::subscription::Subscription::combined([sub_a, sub_b])
}

/// Logical AND of two specs. Satisfied only when both are; fires a change
/// notification whenever the conjunction's value flips (which can happen
/// from either side changing).
pub struct And<A, B>(pub A, pub B);

impl<A: RunSpecification, B: RunSpecification> RunSpecification for And<A, B> {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        self.0.is_satisfied(ctx) && self.1.is_satisfied(ctx)
    }

    fn observe_changes(&self, callback: ChangeCallback) -> crate::subscription::Subscription {
        observe_combined(&self.0, &self.1, callback, |a, b| a && b)
    }
}

/// Logical OR of two specs. Fires a change notification whenever the
/// disjunction's value flips.
pub struct Or<A, B>(pub A, pub B);

impl<A: RunSpecification, B: RunSpecification> RunSpecification for Or<A, B> {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        self.0.is_satisfied(ctx) || self.1.is_satisfied(ctx)
    }

    fn observe_changes(&self, callback: ChangeCallback) -> crate::subscription::Subscription {
        observe_combined(&self.0, &self.1, callback, |a, b| a || b)
    }
}

/// Logical NOT of a spec.
pub struct Not<A>(pub A);

impl<A: RunSpecification> RunSpecification for Not<A> {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        !self.0.is_satisfied(ctx)
    }
}

/// A type-erased run specification stored in [`crate::context::Context`]
/// or a modifier.
pub type SharedRunSpec = Arc<dyn RunSpecification>;

/// Extension trait providing `&`, `|`, `!` syntax for owned
/// [`RunSpecification`]s. Implemented via free functions rather than
/// `std::ops` overloads directly on the trait (trait objects can't
/// implement `Add`-style operators with `Self: Sized` bounds cleanly),
/// matching how `ReconnectConfig`'s knobs are combined by construction,
/// not operator overload.
pub trait RunSpecificationExt: RunSpecification + Sized {
    /// Combine with `other` via logical AND.
    fn and<B: RunSpecification>(self, other: B) -> And<Self, B> {
        And(self, other)
    }

    /// Combine with `other` via logical OR.
    fn or<B: RunSpecification>(self, other: B) -> Or<Self, B> {
        Or(self, other)
    }

    /// Negate this spec.
    fn negate(self) -> Not<Self> {
        Not(self)
    }
}

impl<T: RunSpecification> RunSpecificationExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_true_and_false() {
        let ctx = Context::new();
        assert!(Always(true).is_satisfied(&ctx));
        assert!(!Always(false).is_satisfied(&ctx));
    }

    #[test]
    fn and_or_not_combine() {
        let ctx = Context::new();
        let spec = always(true).and(always(false));
        assert!(!spec.is_satisfied(&ctx));

        let spec = always(true).or(always(false));
        assert!(spec.is_satisfied(&ctx));

        let spec = always(false).negate();
        assert!(spec.is_satisfied(&ctx));
    }

    #[tokio::test]
    async fn and_observe_changes_fires_only_on_conjunction_flip() {
        let (tx_a, rx_a) = tokio::sync::watch::channel(false);
        let (tx_b, rx_b) = tokio::sync::watch::channel(true);
        let spec = observing(rx_a, false).and(observing(rx_b, true));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = spec.observe_changes(Arc::new(move |v| seen2.lock().push(v)));

        // b flips false while a is still false: conjunction stays false,
        // no notification.
        tx_b.send(false).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(seen.lock().is_empty());

        // b flips back true, a flips true: conjunction becomes true.
        tx_b.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx_a.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[tokio::test]
    async fn observing_fires_on_transition() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let spec = observing(rx, false);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = spec.observe_changes(Arc::new(move |v| seen2.lock().push(v)));
        tx.send(true).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec![true]);
    }
}
