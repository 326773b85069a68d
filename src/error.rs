//! Runtime errors — operational failures belonging to the engine itself,
//! distinct from `OperationFailure<E>`, a request's own typed failure
//! value, which the store propagates untouched.

use thiserror::Error;

/// Errors raised by the runtime when a caller misuses the API in a way
/// that can't be expressed as the request's own `Failure` type.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A history/page bound was configured with a non-positive value.
    #[error("{field} must be greater than zero, got {value}")]
    PreconditionViolation {
        /// The configuration field that was violated.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// `retry_latest` was called on a mutation with no prior invocation.
    #[error("no prior invocation to retry for operation at {path}")]
    NoPriorInvocation {
        /// The operation's path, for diagnostics.
        path: String,
    },

    /// A task id referenced by history or dependency bookkeeping is no
    /// longer tracked by the store (it was dropped by a reset).
    #[error("task {task_id} is not tracked by this store")]
    TaskNotFound {
        /// The task id that was looked up.
        task_id: String,
    },

    /// The client already holds a store at this path with an
    /// incompatible request type.
    #[error("store at path {path} already exists with a different request type")]
    StoreTypeMismatch {
        /// The conflicting path.
        path: String,
    },
}

/// The error type a [`crate::store::Store`] run actually returns to its
/// caller: either the request's own typed failure, propagated untouched,
/// or a cancellation the request body never got the chance to surface
/// itself (`spec.md` §5 — the wrapper-level race in
/// [`crate::task::Task::run_if_needed`], not a `Failure` value the
/// request chose to return).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationFailure<E> {
    /// The request's own typed failure.
    Operation(E),
    /// The task was cancelled (e.g. by a concurrent `reset_state`) before
    /// its body produced a result.
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for OperationFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation(e) => e.fmt(f),
            Self::Cancelled => write!(f, "operation was cancelled before completing"),
        }
    }
}

/// A non-fatal condition worth surfacing to an observer (logged via
/// `tracing::warn!`, not returned as an `Err`): misuse that the caller
/// can recover from without the operation failing outright, e.g.
/// `retry_latest` on a never-run mutation where the caller opted into a
/// no-op rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MisuseWarning {
    /// A modifier was applied twice where only the last application has
    /// any effect (e.g. two `Backoff` modifiers).
    RedundantModifier {
        /// The modifier's name, for diagnostics.
        modifier: &'static str,
    },
    /// `subscribe` was called on a store that's already been evicted
    /// from its client's cache.
    SubscribedAfterEviction,
    /// `retry_latest` was called on a mutation store with no prior
    /// invocation to replay. Raised alongside
    /// [`crate::error::RuntimeError::NoPriorInvocation`], not instead of
    /// it — the `Err` is the caller-visible failure, this is the
    /// observability signal that something called `retry_latest` too
    /// early.
    RetryWithoutPriorInvocation {
        /// The operation's path, for diagnostics.
        path: String,
    },
}

impl std::fmt::Display for MisuseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RedundantModifier { modifier } => {
                write!(f, "modifier '{modifier}' applied more than once; only the last application takes effect")
            }
            Self::SubscribedAfterEviction => {
                write!(f, "subscribed to a store after it was evicted from its client's cache")
            }
            Self::RetryWithoutPriorInvocation { path } => {
                write!(f, "retry_latest called at {path} with no prior invocation to retry")
            }
        }
    }
}
