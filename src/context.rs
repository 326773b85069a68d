//! `Context` — a type-indexed, extensible key-value map threaded through
//! every operation run.
//!
//! Modeled as `HashMap<TypeId, Box<dyn Any + Send + Sync>>` per the
//! re-architecture guidance, the same shape the teacher uses for its own
//! per-task `variables: HashMap<String, Value>` in
//! [`crate::domain::TaskRecord`] — except keyed by Rust type instead of a
//! string, and total (every [`ContextKey`] has a default, so lookup never
//! fails).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::backoff::BackoffFunction;
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::delayer::{Delayer, SharedDelayer, TaskSleepDelayer};

/// A compile-time witness for one slot of [`Context`].
///
/// Implement this on a unit struct to declare a new context key:
///
/// ```
/// use operon::context::{Context, ContextKey};
///
/// struct RetryIndexKey;
/// impl ContextKey for RetryIndexKey {
///     type Value = Option<u32>;
///     fn default_value() -> Self::Value { None }
/// }
///
/// let ctx = Context::new();
/// assert_eq!(ctx.get::<RetryIndexKey>(), None);
/// ```
pub trait ContextKey: 'static {
    /// The type of value stored under this key.
    type Value: Send + Sync + Clone + 'static;

    /// The value returned when nothing has been set for this key.
    fn default_value() -> Self::Value;
}

/// A type-indexed, copy-on-write map of per-operation configuration and
/// injected collaborators.
///
/// Lookup is total: [`Context::get`] always returns a value, falling back
/// to `K::default_value()`. Each run may receive a locally-mutated clone
/// (`Context` is `Clone`, and cloning is a shallow `Arc`/map copy — see
/// `TaskContext`'s own note on cheap cloning in the teacher crate).
#[derive(Clone)]
pub struct Context {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    client: Option<Weak<crate::client::ClientInner>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.values.len())
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// An empty context with no overrides set; every key resolves to its
    /// default.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            client: None,
        }
    }

    /// Read the value for `K`, falling back to `K::default_value()`.
    pub fn get<K: ContextKey>(&self) -> K::Value {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|boxed| boxed.downcast_ref::<K::Value>())
            .cloned()
            .unwrap_or_else(K::default_value)
    }

    /// Read the value for `K` only if something was explicitly `set`,
    /// returning `None` rather than `K::default_value()` otherwise — the
    /// same "was this actually set, or am I seeing the default" distinction
    /// the teacher's `get_i64`/`get_bool` variable accessors make, just
    /// typed by `K` instead of by a string key.
    pub fn try_get<K: ContextKey>(&self) -> Option<K::Value> {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|boxed| boxed.downcast_ref::<K::Value>())
            .cloned()
    }

    /// Set the value for `K`, returning `self` for chaining.
    pub fn with<K: ContextKey>(mut self, value: K::Value) -> Self {
        self.set::<K>(value);
        self
    }

    /// Set the value for `K` in place.
    pub fn set<K: ContextKey>(&mut self, value: K::Value) {
        self.values.insert(TypeId::of::<K>(), Arc::new(value));
    }

    /// Remove any override for `K`, reverting to its default on next read.
    pub fn clear<K: ContextKey>(&mut self) {
        self.values.remove(&TypeId::of::<K>());
    }

    /// The clock installed for this run (default: [`SystemClock`]).
    pub fn clock(&self) -> SharedClock {
        self.get::<ClockKey>()
    }

    /// The delayer installed for this run (default: [`TaskSleepDelayer`]).
    pub fn delayer(&self) -> SharedDelayer {
        self.get::<DelayerKey>()
    }

    /// The backoff function installed for this run (default: no backoff).
    pub fn backoff_function(&self) -> BackoffFunction {
        self.get::<BackoffFunctionKey>()
    }

    /// The weak back-reference to the owning client, if this context was
    /// produced by one. Weak to avoid a context -> client -> store ->
    /// context ownership cycle.
    pub fn client(&self) -> Option<Weak<crate::client::ClientInner>> {
        self.client.clone()
    }

    /// Attach a weak client back-reference. Used by
    /// [`crate::client::Client`] when handing out its `default_context`.
    pub fn with_client(mut self, client: Weak<crate::client::ClientInner>) -> Self {
        self.client = Some(client);
        self
    }
}

/// Context key for [`Context::clock`].
pub struct ClockKey;
impl ContextKey for ClockKey {
    type Value = SharedClock;
    fn default_value() -> Self::Value {
        Arc::new(SystemClock)
    }
}

/// Context key for [`Context::delayer`].
pub struct DelayerKey;
impl ContextKey for DelayerKey {
    type Value = SharedDelayer;
    fn default_value() -> Self::Value {
        Arc::new(TaskSleepDelayer)
    }
}

/// Context key for [`Context::backoff_function`].
pub struct BackoffFunctionKey;
impl ContextKey for BackoffFunctionKey {
    type Value = BackoffFunction;
    fn default_value() -> Self::Value {
        BackoffFunction::no_backoff()
    }
}

/// `None` on the first attempt of a run, `Some(i)` on retry `i` (0-indexed).
/// See the retry-index open question in `spec.md` §9: first attempt is
/// `None`, retry `k` (1-indexed) is `Some(k - 1)`.
pub struct RetryIndexKey;
impl ContextKey for RetryIndexKey {
    type Value = Option<u32>;
    fn default_value() -> Self::Value {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CounterKey;
    impl ContextKey for CounterKey {
        type Value = i32;
        fn default_value() -> Self::Value {
            0
        }
    }

    #[test]
    fn lookup_is_total() {
        let ctx = Context::new();
        assert_eq!(ctx.get::<CounterKey>(), 0);
    }

    #[test]
    fn set_overrides_default() {
        let ctx = Context::new().with::<CounterKey>(42);
        assert_eq!(ctx.get::<CounterKey>(), 42);
    }

    #[test]
    fn clone_is_independent() {
        let mut a = Context::new().with::<CounterKey>(1);
        let b = a.clone();
        a.set::<CounterKey>(2);
        assert_eq!(a.get::<CounterKey>(), 2);
        assert_eq!(b.get::<CounterKey>(), 1);
    }

    #[test]
    fn retry_index_defaults_to_none() {
        let ctx = Context::new();
        assert_eq!(ctx.get::<RetryIndexKey>(), None);
    }

    #[test]
    fn try_get_distinguishes_unset_from_explicitly_defaulted() {
        let ctx = Context::new();
        assert_eq!(ctx.try_get::<CounterKey>(), None);

        let ctx = ctx.with::<CounterKey>(0);
        assert_eq!(ctx.try_get::<CounterKey>(), Some(0));
        assert_eq!(ctx.get::<CounterKey>(), 0);
    }
}
