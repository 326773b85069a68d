//! State containers — per-specialization state machines backing a
//! [`crate::store::Store`].
//!
//! `spec.md` §4.3 describes a "uniform update protocol" shared across
//! query, paginated, and mutation state. In practice — as the teacher's
//! own `GenericTaskStore` separates dumb-backend CRUD from domain-shaped
//! bookkeeping in `store/generic.rs` — only a genuinely uniform subset
//! (status derivation, `is_loading`, `reset`) is identical across
//! variants; scheduling and result-ingestion differ enough per variant
//! (page kind dependencies, history entries) that each state type
//! exposes its own inherent methods for those, called directly by the
//! orchestration code in `request::paginated` and `request::mutation`
//! rather than forced through one shape-mismatched trait method. This
//! mirrors `store/mod.rs`'s own note: domain logic is *not* uniform
//! backend CRUD, and modeling it as such would hide real differences.

pub mod mutation;
pub mod paginated;
pub mod query;

use chrono::{DateTime, Utc};

/// The derived, externally observable status of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus<V, E> {
    /// No run has ever completed and none is in progress.
    Idle,
    /// At least one task is currently active.
    Loading,
    /// The most recent terminal update was a success or a failure.
    Result(Result<V, E>),
}

/// The inputs to status derivation (`spec.md` §4.3, "Status derivation").
pub struct StatusInputs<'a, V, E> {
    /// `true` iff the state's active-task set is non-empty.
    pub is_loading: bool,
    /// Monotonic count of successful terminal updates.
    pub value_update_count: u64,
    /// Monotonic count of failed terminal updates.
    pub error_update_count: u64,
    /// When the most recent value was ingested.
    pub value_last_updated_at: Option<DateTime<Utc>>,
    /// When the most recent error was ingested.
    pub error_last_updated_at: Option<DateTime<Utc>>,
    /// The current value, if any is held (independent of `status`, per
    /// stale-while-revalidate semantics: a later error does not clear it).
    pub current: &'a Option<V>,
    /// The current error, if any is held.
    pub error: &'a Option<E>,
}

/// Derive [`OperationStatus`] from the raw state fields, per `spec.md`
/// §4.3 and the error-vs-value precedence rule in §7: "after a failed
/// run, `status ∈ Result(Err)` iff `error_last_updated_at >
/// value_last_updated_at || current == None`; otherwise the last
/// successful value is preserved".
pub fn derive_status<V: Clone, E: Clone>(inputs: StatusInputs<'_, V, E>) -> OperationStatus<V, E> {
    if inputs.is_loading {
        return OperationStatus::Loading;
    }
    if inputs.value_update_count == 0 && inputs.error_update_count == 0 {
        return OperationStatus::Idle;
    }
    // Only a value has ever landed.
    if inputs.error_update_count == 0 {
        return match inputs.current.clone() {
            Some(value) => OperationStatus::Result(Ok(value)),
            None => OperationStatus::Idle,
        };
    }
    // Only an error has ever landed.
    if inputs.value_update_count == 0 {
        return match inputs.error.clone() {
            Some(err) => OperationStatus::Result(Err(err)),
            None => OperationStatus::Idle,
        };
    }
    // Both have landed at least once: the more recent timestamp wins,
    // and a missing current value forces the error to win regardless
    // (spec.md §7).
    let error_is_newer = match (inputs.value_last_updated_at, inputs.error_last_updated_at) {
        (Some(v), Some(e)) => e > v,
        (None, Some(_)) => true,
        _ => false,
    };
    if (error_is_newer || inputs.current.is_none()) && inputs.error.is_some() {
        OperationStatus::Result(Err(inputs.error.clone().unwrap()))
    } else {
        match inputs.current.clone() {
            Some(value) => OperationStatus::Result(Ok(value)),
            None => OperationStatus::Idle,
        }
    }
}

/// Returned by `reset()`: the cancellation subscriptions for every task
/// the state was holding. The store, not the state, performs the
/// cancellation (`spec.md` §4.3).
#[derive(Default)]
pub struct ResetEffect {
    /// Subscriptions to cancel, one per task that was active at reset
    /// time.
    pub cancel: Vec<crate::subscription::Subscription>,
}

impl ResetEffect {
    /// Cancel every task this reset touched. Idempotent (each
    /// subscription cancels at most once).
    pub fn apply(self) {
        for sub in self.cancel {
            sub.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_when_no_updates() {
        let status: OperationStatus<i32, String> = derive_status(StatusInputs {
            is_loading: false,
            value_update_count: 0,
            error_update_count: 0,
            value_last_updated_at: None,
            error_last_updated_at: None,
            current: &None,
            error: &None,
        });
        assert_eq!(status, OperationStatus::Idle);
    }

    #[test]
    fn loading_overrides_everything() {
        let status: OperationStatus<i32, String> = derive_status(StatusInputs {
            is_loading: true,
            value_update_count: 5,
            error_update_count: 5,
            value_last_updated_at: Some(Utc::now()),
            error_last_updated_at: Some(Utc::now()),
            current: &Some(1),
            error: &Some("e".to_string()),
        });
        assert_eq!(status, OperationStatus::Loading);
    }

    #[test]
    fn newer_error_wins_over_older_value() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let current = Some(1);
        let error = Some("boom".to_string());
        let status = derive_status(StatusInputs {
            is_loading: false,
            value_update_count: 1,
            error_update_count: 1,
            value_last_updated_at: Some(t0),
            error_last_updated_at: Some(t1),
            current: &current,
            error: &error,
        });
        assert_eq!(status, OperationStatus::Result(Err("boom".to_string())));
    }

    #[test]
    fn newer_value_wins_over_older_error_stale_while_revalidate() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let current = Some(1);
        let error = Some("boom".to_string());
        let status = derive_status(StatusInputs {
            is_loading: false,
            value_update_count: 1,
            error_update_count: 1,
            value_last_updated_at: Some(t1),
            error_last_updated_at: Some(t0),
            current: &current,
            error: &error,
        });
        assert_eq!(status, OperationStatus::Result(Ok(1)));
    }

    #[test]
    fn error_wins_when_no_current_value_even_if_older() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let current: Option<i32> = None;
        let error = Some("boom".to_string());
        let status = derive_status(StatusInputs {
            is_loading: false,
            value_update_count: 0,
            error_update_count: 1,
            value_last_updated_at: Some(t1),
            error_last_updated_at: Some(t0),
            current: &current,
            error: &error,
        });
        assert_eq!(status, OperationStatus::Result(Err("boom".to_string())));
    }
}
