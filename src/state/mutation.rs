//! `MutationState` — argument-in/value-out operations with a bounded
//! history of past invocations (`spec.md` §3).

use crate::state::{derive_status, OperationStatus, ResetEffect, StatusInputs};
use crate::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// A fixed-capacity FIFO: pushing past capacity evicts the oldest entry
/// first (`spec.md` §3, "oldest evicted first"). `capacity` must be `> 0`;
/// enforced by [`crate::modifier::max_history::MaxHistoryLength`] before
/// this type is ever constructed with an attacker-controlled value.
pub struct OrderedBoundedList<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> OrderedBoundedList<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Push a new item, evicting the oldest if at capacity. Returns the
    /// evicted item, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    pub fn get_mut_by<F: Fn(&T) -> bool>(&mut self, pred: F) -> Option<&mut T> {
        self.items.iter_mut().find(|item| pred(item))
    }

    /// Re-clamp to a new capacity, evicting from the front as needed.
    /// Used when `MaxHistoryLength` is changed on an existing store.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }
}

/// One past (or in-flight) invocation of a mutation.
pub struct HistoryEntry<A, V, E> {
    pub id: TaskId,
    pub arguments: A,
    pub start_date: DateTime<Utc>,
    pub current_result: Option<Result<V, E>>,
    pub last_updated_at: DateTime<Utc>,
    pub status: OperationStatus<V, E>,
    pub task: Arc<Task<V, E>>,
}

/// The state backing a mutation request.
pub struct MutationState<A, V, E> {
    initial: Option<V>,
    current: Option<V>,
    error: Option<E>,
    value_update_count: u64,
    value_last_updated_at: Option<DateTime<Utc>>,
    error_update_count: u64,
    error_last_updated_at: Option<DateTime<Utc>>,
    history: OrderedBoundedList<HistoryEntry<A, V, E>>,
}

impl<A, V, E> MutationState<A, V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A fresh state with the given bounded history capacity
    /// (`max_history_length`, `> 0`).
    pub fn new(initial: Option<V>, max_history_length: usize) -> Self {
        Self {
            initial: initial.clone(),
            current: initial,
            error: None,
            value_update_count: 0,
            value_last_updated_at: None,
            error_update_count: 0,
            error_last_updated_at: None,
            history: OrderedBoundedList::new(max_history_length),
        }
    }

    pub fn current(&self) -> Option<&V> {
        self.current.as_ref()
    }

    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    pub fn history(&self) -> &OrderedBoundedList<HistoryEntry<A, V, E>> {
        &self.history
    }

    /// `true` while any history entry's task is still active.
    pub fn is_loading(&self) -> bool {
        self.history.iter().any(|entry| entry.task.is_active())
    }

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

    /// Start tracking a new invocation. Returns the evicted entry, if the
    /// history was already at capacity.
    pub fn start_invocation(
        &mut self,
        arguments: A,
        task: Arc<Task<V, E>>,
        start_date: DateTime<Utc>,
    ) -> Option<HistoryEntry<A, V, E>> {
        let entry = HistoryEntry {
            id: task.id(),
            arguments,
            start_date,
            current_result: None,
            last_updated_at: start_date,
            status: OperationStatus::Loading,
            task,
        };
        self.history.push(entry)
    }

    /// Ingest a yielded or terminal result for the invocation `id`,
    /// updating both its history entry and the aggregate current/error
    /// fields (`spec.md` §4.3, same rules as [`crate::state::query::QueryState`]).
    pub fn ingest(&mut self, id: TaskId, result: Result<V, E>, at: DateTime<Utc>) {
        if let Some(entry) = self.history.get_mut_by(|e| e.id == id) {
            entry.current_result = Some(result.clone());
            entry.last_updated_at = at;
            entry.status = OperationStatus::Result(result.clone());
        }
        match result {
            Ok(value) => {
                self.current = Some(value);
                self.value_update_count = self.value_update_count.saturating_add(1);
                self.value_last_updated_at = Some(at);
            }
            Err(error) => {
                self.error = Some(error);
                self.error_update_count = self.error_update_count.saturating_add(1);
                self.error_last_updated_at = Some(at);
            }
        }
    }

    /// Mark invocation `id`'s task as no longer active; its history entry
    /// keeps its last-known status (`spec.md` §4.3, "mark the history
    /// entry finished with its final status").
    pub fn finish_invocation(&mut self, id: TaskId) {
        if let Some(entry) = self.history.get_mut_by(|e| e.id == id) {
            if !matches!(entry.status, OperationStatus::Result(_)) {
                entry.status = entry.task.state().into();
            }
        }
    }

    /// The arguments of the most recent invocation, for `retry_latest`.
    pub fn latest_arguments(&self) -> Option<&A> {
        self.history.last().map(|e| &e.arguments)
    }

    /// Overwrite the aggregate current/error fields directly, bypassing
    /// history — used for a [`crate::controller::Controller`]'s pushed
    /// update, which has no `Arguments` value of its own to attach to a
    /// history entry.
    pub fn ingest_external(&mut self, result: Result<V, E>, at: DateTime<Utc>) {
        match result {
            Ok(value) => {
                self.current = Some(value);
                self.value_update_count = self.value_update_count.saturating_add(1);
                self.value_last_updated_at = Some(at);
            }
            Err(error) => {
                self.error = Some(error);
                self.error_update_count = self.error_update_count.saturating_add(1);
                self.error_last_updated_at = Some(at);
            }
        }
    }

    pub fn reset(&mut self) -> ResetEffect {
        let cancel = self
            .history
            .iter()
            .map(|e| e.task.subscription())
            .collect();
        self.current = self.initial.clone();
        self.error = None;
        self.value_update_count = 0;
        self.value_last_updated_at = None;
        self.error_update_count = 0;
        self.error_last_updated_at = None;
        self.history = OrderedBoundedList::new(self.history.capacity.max(1));
        ResetEffect { cancel }
    }
}

impl<V, E> From<crate::task::ExecutionState<V, E>> for OperationStatus<V, E> {
    fn from(state: crate::task::ExecutionState<V, E>) -> Self {
        match state {
            crate::task::ExecutionState::Finished(result) => OperationStatus::Result(result),
            crate::task::ExecutionState::Cancelled => OperationStatus::Idle,
            crate::task::ExecutionState::NotRun | crate::task::ExecutionState::Running => {
                OperationStatus::Loading
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::task::TaskConfig;

    fn task() -> Arc<Task<i32, String>> {
        Task::new(TaskConfig::new(Context::new()), vec![])
    }

    #[test]
    fn bounded_list_evicts_oldest() {
        let mut list = OrderedBoundedList::new(2);
        assert_eq!(list.push(1), None);
        assert_eq!(list.push(2), None);
        assert_eq!(list.push(3), Some(1));
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn invocation_lifecycle_updates_current_and_history() {
        let mut state: MutationState<i32, i32, String> = MutationState::new(None, 10);
        let t = task();
        let id = t.id();
        let start = Utc::now();
        state.start_invocation(1, t, start);
        assert_eq!(state.history().len(), 1);

        state.ingest(id, Ok(42), start + chrono::Duration::seconds(1));
        assert_eq!(state.current(), Some(&42));
        assert_eq!(
            state.history().last().unwrap().current_result,
            Some(Ok(42))
        );
    }

    #[test]
    fn history_respects_max_length() {
        let mut state: MutationState<i32, i32, String> = MutationState::new(None, 2);
        for args in 0..3 {
            let t = task();
            state.start_invocation(args, t, Utc::now());
        }
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.latest_arguments(), Some(&2));
    }
}
