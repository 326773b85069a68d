//! `QueryState` — the state container behind a plain (non-paginated,
//! non-mutating) request.
//!
//! Bookkeeping mirrors the teacher's `TaskRecord`: every ingested update
//! stamps a `chrono::DateTime<Utc>` and bumps a monotonic counter rather
//! than trusting wall-clock ordering alone (`spec.md` §3, "Data Model").

use crate::state::{derive_status, OperationStatus, ResetEffect, StatusInputs};
use crate::task::Task;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The state backing a query-shaped request: a single current value, a
/// single current error, and the set of tasks currently fetching it.
#[derive(Clone)]
pub struct QueryState<V, E> {
    current: Option<V>,
    initial: Option<V>,
    value_update_count: u64,
    value_last_updated_at: Option<DateTime<Utc>>,
    error: Option<E>,
    error_update_count: u64,
    error_last_updated_at: Option<DateTime<Utc>>,
    active_tasks: Vec<Arc<Task<V, E>>>,
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> QueryState<V, E> {
    /// A fresh state seeded with an optional initial value (`spec.md` §3:
    /// "initial seeds `current` but is never counted as an update").
    pub fn new(initial: Option<V>) -> Self {
        Self {
            current: initial.clone(),
            initial,
            value_update_count: 0,
            value_last_updated_at: None,
            error: None,
            error_update_count: 0,
            error_last_updated_at: None,
            active_tasks: Vec::new(),
        }
    }

    /// The current value, if any is held.
    pub fn current(&self) -> Option<&V> {
        self.current.as_ref()
    }

    /// The current error, if any is held.
    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// `true` while at least one task is fetching this query.
    pub fn is_loading(&self) -> bool {
        !self.active_tasks.is_empty()
    }

    /// The derived status (`spec.md` §4.3 / §7).
    pub fn status(&self) -> OperationStatus<V, E> {
        derive_status(StatusInputs {
            is_loading: self.is_loading(),
            value_update_count: self.value_update_count,
            error_update_count: self.error_update_count,
            value_last_updated_at: self.value_last_updated_at,
            error_last_updated_at: self.error_last_updated_at,
            current: &self.current,
            error: &self.error,
        })
    }

    /// Register a task as actively fetching this query.
    pub fn register_task(&mut self, task: Arc<Task<V, E>>) {
        self.active_tasks.push(task);
    }

    /// Drop a task from the active set once it has finished (successfully,
    /// with an error, or by cancellation). A no-op if the task isn't
    /// present (it may have already been cleared by a `reset`).
    pub fn deregister_task(&mut self, task_id: crate::task::TaskId) {
        self.active_tasks.retain(|t| t.id() != task_id);
    }

    /// Ingest a successful terminal or yielded update (`spec.md` §4.9:
    /// successful updates clear any held error — stale-while-revalidate
    /// only holds a value across a *later* error, never the reverse).
    pub fn ingest_value(&mut self, value: V, at: DateTime<Utc>) {
        self.current = Some(value);
        self.value_update_count = self.value_update_count.saturating_add(1);
        self.value_last_updated_at = Some(at);
    }

    /// Ingest a failed terminal or yielded update. The previous value, if
    /// any, is preserved (`current` is untouched) so a consumer can keep
    /// rendering stale data while `status()` reports the failure.
    pub fn ingest_error(&mut self, error: E, at: DateTime<Utc>) {
        self.error = Some(error);
        self.error_update_count = self.error_update_count.saturating_add(1);
        self.error_last_updated_at = Some(at);
    }

    /// Reset to the seeded initial value, clearing all bookkeeping and
    /// returning the cancellation subscriptions for every task that was
    /// active (the caller applies them; `spec.md` §4.3).
    pub fn reset(&mut self) -> ResetEffect {
        let cancel = self
            .active_tasks
            .drain(..)
            .map(|t| t.subscription())
            .collect();
        self.current = self.initial.clone();
        self.value_update_count = 0;
        self.value_last_updated_at = None;
        self.error = None;
        self.error_update_count = 0;
        self.error_last_updated_at = None;
        ResetEffect { cancel }
    }

    /// Active task ids, for diagnostics (`Store::describe`).
    pub fn active_task_ids(&self) -> BTreeSet<crate::task::TaskId> {
        self.active_tasks.iter().map(|t| t.id()).collect()
    }
}
