//! `Deduplicated(pred)` — at most one concurrent execution of the base
//! per equivalence class of `pred`; later concurrent callers attach to
//! the first and receive its result (`spec.md` §4.2).
//!
//! Unlike every other built-in modifier, `Deduplicated` does not
//! implement [`crate::modifier::Modifier`]. The re-architecture notes for
//! this store call out the risk directly: "avoid tying waiters'
//! lifetimes to the initiating task". A waiter that gets cancelled must
//! not take the in-flight run down with it while other waiters remain
//! attached — which means the owning execution has to run on the
//! runtime independently of whichever caller happened to start it,
//! rather than simply being awaited inline the way `Modifier::run`'s
//! `&Base` signature assumes. That needs an owned, `'static` handle to
//! the wrapped request, so `Deduplicated<R>` wraps `R` directly as a
//! [`Request`] instead.

use crate::context::Context;
use crate::continuation::Continuation;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Two runs are equivalent for deduplication purposes if this predicate,
/// given the context the active run started with and the context of the
/// new caller, returns `true`.
pub type DedupPredicate = Arc<dyn Fn(&Context, &Context) -> bool + Send + Sync>;

struct ActiveRun {
    context: Context,
    cancel: CancellationToken,
}

struct Entry<V, E> {
    waiter_count: usize,
    result: Option<Result<V, E>>,
    notify: Arc<Notify>,
}

struct DedupState<V, E> {
    next_id: u64,
    active: Vec<(u64, ActiveRun)>,
    entries: HashMap<u64, Entry<V, E>>,
}

impl<V, E> Default for DedupState<V, E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            active: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

struct DedupShared<R: Request> {
    inner: R,
    pred: DedupPredicate,
    state: Mutex<DedupState<R::Value, R::Failure>>,
}

/// Wraps `R`, ensuring at most one concurrent execution per equivalence
/// class of its deduplication predicate.
pub struct Deduplicated<R: Request> {
    shared: Arc<DedupShared<R>>,
}

impl<R: Request> Clone for Deduplicated<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Request> Deduplicated<R> {
    /// Wrap `inner`, deduplicating concurrent runs whose contexts satisfy
    /// `pred`.
    pub fn new(inner: R, pred: impl Fn(&Context, &Context) -> bool + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(DedupShared {
                inner,
                pred: Arc::new(pred),
                state: Mutex::new(DedupState::default()),
            }),
        }
    }

    /// Treat every concurrent run as equivalent, regardless of context —
    /// the default a plain fetch-style store uses (`spec.md` §6).
    pub fn always_equivalent(inner: R) -> Self {
        Self::new(inner, |_, _| true)
    }
}

#[async_trait]
impl<R: Request> Request for Deduplicated<R> {
    type Value = R::Value;
    type Failure = R::Failure;

    fn setup(&self, context: &mut Context) {
        self.shared.inner.setup(context);
    }

    async fn run(
        &self,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        enum Role {
            Owner { own_cancel: CancellationToken },
            Waiter,
        }

        let (id, notify, role) = {
            let mut state = self.shared.state.lock();
            let existing = state
                .active
                .iter()
                .find(|(_, run)| (self.shared.pred)(&run.context, &context))
                .map(|(id, _)| *id);

            if let Some(id) = existing {
                let entry = state
                    .entries
                    .get_mut(&id)
                    .expect("an active run always has a matching entry");
                entry.waiter_count += 1;
                (id, entry.notify.clone(), Role::Waiter)
            } else {
                let id = state.next_id;
                state.next_id += 1;
                let notify = Arc::new(Notify::new());
                let own_cancel = CancellationToken::new();
                state.entries.insert(
                    id,
                    Entry {
                        waiter_count: 1,
                        result: None,
                        notify: notify.clone(),
                    },
                );
                state.active.push((
                    id,
                    ActiveRun {
                        context: context.clone(),
                        cancel: own_cancel.clone(),
                    },
                ));
                (id, notify, Role::Owner { own_cancel })
            }
        };

        if let Role::Owner { own_cancel } = role {
            let shared = self.shared.clone();
            let run_isolation = Isolation::from_token(own_cancel);
            let run_context = context.clone();
            let run_continuation = continuation.clone();
            tokio::spawn(async move {
                let result = shared
                    .inner
                    .run(run_isolation, run_context, run_continuation)
                    .await;
                let mut state = shared.state.lock();
                state.active.retain(|(active_id, _)| *active_id != id);
                if let Some(entry) = state.entries.get_mut(&id) {
                    entry.result = Some(result);
                    entry.notify.notify_waiters();
                    if entry.waiter_count == 0 {
                        state.entries.remove(&id);
                    }
                }
            });
        }

        loop {
            {
                let mut state = self.shared.state.lock();
                let mut finished = None;
                if let Some(entry) = state.entries.get_mut(&id) {
                    if entry.result.is_some() {
                        entry.waiter_count = entry.waiter_count.saturating_sub(1);
                        finished = entry.result.clone();
                        if entry.waiter_count == 0 {
                            state.entries.remove(&id);
                        }
                    }
                }
                if let Some(result) = finished {
                    return result;
                }
            }

            tokio::select! {
                biased;
                () = isolation.cancelled() => {
                    let mut state = self.shared.state.lock();
                    let mut should_cancel_owner = false;
                    if let Some(entry) = state.entries.get_mut(&id) {
                        if entry.result.is_none() {
                            entry.waiter_count = entry.waiter_count.saturating_sub(1);
                            should_cancel_owner = entry.waiter_count == 0;
                        }
                    }
                    if should_cancel_owner {
                        if let Some((_, run)) = state.active.iter().find(|(active_id, _)| *active_id == id) {
                            run.cancel.cancel();
                        }
                    }
                    drop(state);
                    // This whole future is about to be dropped by the
                    // owning Task's own cancellation race; nothing
                    // further needs to happen here.
                    std::future::pending::<()>().await;
                }
                () = notify.notified() => {}
            }
        }
    }
}
