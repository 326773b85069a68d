//! `Store` — the per-operation runtime (`spec.md` §4.6).
//!
//! Each specialization (query, paginated, mutation) gets its own
//! concrete store type in the submodules below, for the same reason
//! `state::mod` keeps `QueryState`/`PaginatedState`/`MutationState`
//! separate rather than forcing a single shape-mismatched trait: the
//! public contract genuinely differs (`fetch_next_page` only makes sense
//! for a paginated store, `mutate`/`retry_latest` only for a mutation
//! store). What *is* uniform — subscriber bookkeeping, the
//! one-bracket-per-coalesced-run event dispatch, path/eviction — lives
//! here and is shared by composition, not inheritance.

pub mod mutation;
pub mod paginated;
pub mod query;

use crate::path::OperationPath;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The object-safe facade every concrete store implements, so the
/// [`crate::client::Client`]'s cache, prefix matching, and bulk
/// operations (`spec.md` §4.7) don't need to know which specialization
/// backs a given path.
pub trait AnyStore: Send + Sync {
    /// This store's path.
    fn path(&self) -> &OperationPath;
    /// Number of currently registered subscribers.
    fn subscriber_count(&self) -> usize;
    /// `true` while at least one task is active.
    fn is_loading(&self) -> bool;
    /// Cancel every active task and drop held state, as on client
    /// eviction (`spec.md` §3, "Lifecycle").
    fn evict(&self);
    /// Downcast support, so a caller holding `Arc<dyn AnyStore>` can
    /// recover the concrete `QueryStore<R>`/`PaginatedStore<R>`/
    /// `MutationStore<R>` it actually is.
    fn as_any(&self) -> &dyn Any;

    /// A one-line diagnostic summary, for a debug panel or log line —
    /// additive telemetry, not part of any typed contract (`SPEC_FULL.md`
    /// §B). The default is built entirely from this trait's own object-
    /// safe accessors, so no concrete store needs to override it.
    fn describe(&self) -> String {
        format!(
            "{} (subscribers={}, loading={})",
            self.path(),
            self.subscriber_count(),
            self.is_loading()
        )
    }
}

/// A simple callback fired whenever a store's observable state changes
/// (a successful or failed update, a reset, a loading-flag flip). Takes
/// no payload — subscribers re-read whatever observable property they
/// care about (`spec.md` §4.6: `subscribe(handler) -> Subscription`).
pub type StateChangeHandler = Arc<dyn Fn() + Send + Sync>;

/// Shared subscriber bookkeeping for every store specialization.
///
/// Dispatch always happens with no lock held on the store's own state —
/// a handler that calls back into the store (e.g. reading `current_value`)
/// must not deadlock against the mutation that triggered it. This trades
/// the spec's literal "single recursive mutex" for a plain mutex plus a
/// "notify after releasing" discipline, which gives the same serialized-
/// mutation guarantee without the reentrancy hazard a recursive lock
/// invites once a handler itself touches the store.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, StateChangeHandler)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, returning its id (for removal) and the
    /// subscriber count immediately before this registration — callers
    /// use "was zero" to decide whether to kick off an automatic run.
    pub fn add(&self, handler: StateChangeHandler) -> (u64, usize) {
        let mut handlers = self.handlers.lock();
        let count_before = handlers.len();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        handlers.push((id, handler));
        (id, count_before)
    }

    pub fn remove(&self, id: u64) -> usize {
        let mut handlers = self.handlers.lock();
        handlers.retain(|(h_id, _)| *h_id != id);
        handlers.len()
    }

    pub fn count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Invoke every registered handler with the current handler list
    /// snapshotted first, so a handler that subscribes/unsubscribes
    /// during dispatch doesn't corrupt this pass.
    pub fn notify(&self) {
        let snapshot: Vec<StateChangeHandler> =
            self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler();
        }
    }
}
