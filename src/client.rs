//! `Client` — a keyed pool of stores with prefix pattern matching, bulk
//! operations, and memory-pressure eviction (`spec.md` §4.7).
//!
//! Mirrors the teacher's split between a dumb concurrent backend
//! (`InMemoryBackend`, a `DashMap<String, (Vec<u8>, u64)>` with no domain
//! logic — `store/memory.rs`) and the domain layer wrapping it: the
//! [`StoreCache`] trait here is that dumb, swappable
//! `DashMap<OperationPath, StoreEntry>`; [`Client`] is the domain layer
//! that knows about request types, the default modifier policy, and
//! prefix matching, the way `InMemoryTaskStore`/`GenericTaskStore` sit on
//! top of `InMemoryBackend`.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::backoff::BackoffFunction;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::duration::Duration;
use crate::error::RuntimeError;
use crate::modifier::auto_run::EnableAutomaticRunning;
use crate::modifier::backoff::Backoff;
use crate::modifier::dedup::Deduplicated;
use crate::modifier::events::EventBracket;
use crate::modifier::rerun::RerunOnChange;
use crate::modifier::retry::Retry;
use crate::modifier::{Modified, RequestExt};
use crate::path::OperationPath;
use crate::request::mutation::{MutationAdapter, MutationRequest};
use crate::request::paginated::{PaginatedAdapter, PaginatedRequest};
use crate::request::query::QueryRequest;
use crate::request::Request;
use crate::run_spec::{always, SharedRunSpec};
use crate::store::mutation::MutationStore;
use crate::store::paginated::PaginatedStore;
use crate::store::query::QueryStore;
use crate::store::AnyStore;

/// The default retry budget the production policy applies. Not part of
/// `spec.md`'s literal text (§6 specifies *that* retry/backoff are
/// applied, not the limit); chosen as a finite, conservative default
/// rather than unbounded retries. See `DESIGN.md`.
const DEFAULT_RETRY_LIMIT: u32 = 3;

/// A cached store plus its type-erased handle. `erased` serves the
/// client's path/subscriber/eviction bookkeeping; `typed` is downcast
/// back to the concrete store type on lookup so that a second call with
/// the same path and the same request type gets the exact same `Arc`
/// (`spec.md` §8, "Path identity").
#[derive(Clone)]
pub struct StoreEntry {
    pub erased: Arc<dyn AnyStore>,
    pub typed: Arc<dyn Any + Send + Sync>,
}

/// A pluggable in-memory map of path to store, with memory-pressure
/// eviction (`spec.md` §4.7).
///
/// This trait carries no domain logic — no knowledge of request types,
/// defaults, or prefix semantics beyond "iterate everything I hold".
/// [`Client`] is responsible for all of that, exactly as `GenericTaskStore`
/// is responsible for state machine validation and owner isolation while
/// `InMemoryBackend` only stores bytes.
pub trait StoreCache: Send + Sync + 'static {
    fn get(&self, path: &OperationPath) -> Option<StoreEntry>;
    fn insert(&self, path: OperationPath, entry: StoreEntry);
    fn remove(&self, path: &OperationPath) -> Option<StoreEntry>;
    fn all(&self) -> Vec<(OperationPath, StoreEntry)>;

    /// React to a system memory-pressure signal. The default clears
    /// every cached store, cancelling their in-flight tasks via
    /// [`AnyStore::evict`] first (`spec.md` §4.7: "exact eviction order
    /// is not observable beyond all cached stores may be cleared").
    fn on_memory_pressure(&self) {
        for (_, entry) in self.all() {
            entry.erased.evict();
        }
        self.clear();
    }

    /// Drop every cached entry without evicting (used internally by the
    /// default [`StoreCache::on_memory_pressure`] after eviction, and
    /// available directly for tests).
    fn clear(&self);
}

/// The default [`StoreCache`]: a `DashMap` keyed by [`OperationPath`],
/// the same fine-grained-locking shape as the teacher's
/// `InMemoryBackend` (`store/memory.rs`).
#[derive(Default)]
pub struct InMemoryStoreCache {
    entries: DashMap<OperationPath, StoreEntry>,
}

impl InMemoryStoreCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreCache for InMemoryStoreCache {
    fn get(&self, path: &OperationPath) -> Option<StoreEntry> {
        self.entries.get(path).map(|e| e.value().clone())
    }

    fn insert(&self, path: OperationPath, entry: StoreEntry) {
        self.entries.insert(path, entry);
    }

    fn remove(&self, path: &OperationPath) -> Option<StoreEntry> {
        self.entries.remove(path).map(|(_, e)| e)
    }

    fn all(&self) -> Vec<(OperationPath, StoreEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Everything a [`Client`] needs to build and wire a fresh store: the
/// chain types are fixed by `spec.md` §6's "Defaults policy" list, and
/// only the *values* (retry limit, backoff duration, spec satisfaction)
/// vary with [`RuntimeConfig::test_mode`] — so, unlike a conventional
/// `dyn`-dispatched factory, this is a plain value-parameterized builder
/// rather than a trait object. `spec.md` §4.7 calls this a "pluggable
/// `StoreCreator`"; Rust's generic-method/object-safety tradeoff makes a
/// literal `dyn StoreCreator` impractical here (each request type needs
/// its own concrete wrapped type) — see `DESIGN.md`'s Open Question
/// resolution. Pluggability is expressed instead by calling the `_raw`
/// store constructors below to supply an entirely custom modifier chain.
#[derive(Clone)]
pub struct DefaultPolicy {
    config: RuntimeConfig,
    network_online: SharedRunSpec,
    app_active: SharedRunSpec,
}

impl DefaultPolicy {
    fn retry_limit(&self) -> u32 {
        if self.config.test_mode() {
            0
        } else {
            DEFAULT_RETRY_LIMIT
        }
    }

    fn backoff(&self) -> BackoffFunction {
        if self.config.test_mode() {
            BackoffFunction::no_backoff()
        } else {
            BackoffFunction::exponential(Duration::from_secs(1))
        }
    }

    fn auto_run_spec(&self) -> SharedRunSpec {
        Arc::new(always(!self.config.test_mode()))
    }

    fn rerun_spec(&self, signal: &SharedRunSpec) -> SharedRunSpec {
        if self.config.test_mode() {
            Arc::new(always(false))
        } else {
            signal.clone()
        }
    }

    /// Wrap a query-shaped request in `{retry, backoff(exponential(1s)),
    /// event bracket, deduplicated, enable_automatic_running,
    /// rerun_on_change(network), rerun_on_change(app)}`, in that order
    /// (`spec.md` §6). The event bracket sits just inside dedup so that
    /// only the run that actually reaches the base — the dedup owner —
    /// ever fires `on_run_started`/`on_result_received`/`on_run_ended`,
    /// regardless of how many callers coalesced onto it.
    pub fn wrap_query<R: QueryRequest>(&self, request: R) -> DefaultQueryChain<R> {
        let retried = request.with_modifier(Retry::new(self.retry_limit()));
        let backed_off = retried.with_modifier(Backoff(self.backoff()));
        let bracketed = backed_off.with_modifier(EventBracket::new());
        let deduped = bracketed.deduplicated(|_, _| true);
        let auto_run = deduped.with_modifier(EnableAutomaticRunning(self.auto_run_spec()));
        let network = auto_run.with_modifier(RerunOnChange(self.rerun_spec(&self.network_online)));
        network.with_modifier(RerunOnChange(self.rerun_spec(&self.app_active)))
    }

    /// Same policy, specialized to a [`PaginatedRequest`]'s dedup
    /// predicate: equivalence compares the paging mode in effect
    /// (`spec.md` §4.2, "For paginated requests the default predicate
    /// compares the current `paging.request` value").
    pub fn wrap_paginated<R: PaginatedRequest>(
        &self,
        request: R,
    ) -> DefaultPaginatedChain<R> {
        let adapted = PaginatedAdapter(request);
        let retried = adapted.with_modifier(Retry::new(self.retry_limit()));
        let backed_off = retried.with_modifier(Backoff(self.backoff()));
        let bracketed = backed_off.with_modifier(EventBracket::new());
        let deduped = bracketed.deduplicated(|a, b| {
            crate::request::paginated::paging_request::<R::PageId>(a)
                == crate::request::paginated::paging_request::<R::PageId>(b)
        });
        let auto_run = deduped.with_modifier(EnableAutomaticRunning(self.auto_run_spec()));
        let network = auto_run.with_modifier(RerunOnChange(self.rerun_spec(&self.network_online)));
        network.with_modifier(RerunOnChange(self.rerun_spec(&self.app_active)))
    }

    /// Mutations only get `{retry, backoff(exponential(1s)), event
    /// bracket}` — no dedup, no auto-run, no rerun specs (`spec.md` §6:
    /// "for mutations"). There's no dedup boundary to sit inside of here,
    /// so the bracket is simply the outermost layer.
    pub fn wrap_mutation<R: MutationRequest>(&self, request: R) -> DefaultMutationChain<R> {
        let adapted = MutationAdapter(request);
        let retried = adapted.with_modifier(Retry::new(self.retry_limit()));
        let backed_off = retried.with_modifier(Backoff(self.backoff()));
        backed_off.with_modifier(EventBracket::new())
    }
}

type RetriedBackedOff<R> = Modified<Modified<R, Retry>, Backoff>;

/// `RetriedBackedOff<R>` with an `EventBracket` installed immediately
/// outside it — the per-call event-handler boundary every default chain
/// shares.
type Bracketed<R: Request> =
    Modified<RetriedBackedOff<R>, EventBracket<<R as Request>::Value, <R as Request>::Failure>>;

/// The concrete chain [`DefaultPolicy::wrap_query`] produces.
pub type DefaultQueryChain<R> = Modified<
    Modified<
        Modified<Deduplicated<Bracketed<R>>, EnableAutomaticRunning>,
        RerunOnChange,
    >,
    RerunOnChange,
>;

/// The concrete chain [`DefaultPolicy::wrap_paginated`] produces.
pub type DefaultPaginatedChain<R> = Modified<
    Modified<
        Modified<Deduplicated<Bracketed<PaginatedAdapter<R>>>, EnableAutomaticRunning>,
        RerunOnChange,
    >,
    RerunOnChange,
>;

/// The concrete chain [`DefaultPolicy::wrap_mutation`] produces.
pub type DefaultMutationChain<R> = Bracketed<MutationAdapter<R>>;

/// The client's shared, lockable state. Kept as a distinct type from
/// [`Client`] (rather than `Client` just being this struct) so that
/// [`Context::with_client`] can hold a [`Weak`] reference to it without
/// creating a client -> context -> store -> client cycle (`spec.md` §3,
/// "Ownership").
pub struct ClientInner {
    cache: Arc<dyn StoreCache>,
    default_context: parking_lot::Mutex<Context>,
    policy: parking_lot::Mutex<DefaultPolicy>,
}

/// A keyed pool of stores (`spec.md` §4.7). Cheap to clone — internally
/// an `Arc<ClientInner>` — mirroring `InMemoryTaskStore`'s own
/// cheap-to-share handle semantics.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client with the production defaults: a fresh
    /// [`InMemoryStoreCache`] and both platform signals always reporting
    /// "online"/"active" absent a real adapter (`spec.md` §1: platform
    /// observers are "supplied as implementations of a small trait";
    /// this is the inert baseline until one is wired in — see
    /// `DESIGN.md`).
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_signals(config, Arc::new(always(true)), Arc::new(always(true)))
    }

    /// Build a client with explicit network/app-active signals, the
    /// trait-boundary collaborators `spec.md` §1 treats as external.
    pub fn with_signals(
        config: RuntimeConfig,
        network_online: SharedRunSpec,
        app_active: SharedRunSpec,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                cache: Arc::new(InMemoryStoreCache::new()),
                default_context: parking_lot::Mutex::new(Context::new()),
                policy: parking_lot::Mutex::new(DefaultPolicy {
                    config,
                    network_online,
                    app_active,
                }),
            }),
        }
    }

    /// Build a client backed by a caller-supplied [`StoreCache`] (for an
    /// eviction policy other than "clear everything on memory
    /// pressure").
    pub fn with_cache(config: RuntimeConfig, cache: Arc<dyn StoreCache>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                cache,
                default_context: parking_lot::Mutex::new(Context::new()),
                policy: parking_lot::Mutex::new(DefaultPolicy {
                    config,
                    network_online: Arc::new(always(true)),
                    app_active: Arc::new(always(true)),
                }),
            }),
        }
    }

    fn context_for_new_store(&self) -> Context {
        self.inner
            .default_context
            .lock()
            .clone()
            .with_client(Arc::downgrade(&self.inner))
    }

    fn get_or_create<S, Build>(&self, path: OperationPath, build: Build) -> Arc<S>
    where
        S: AnyStore + Send + Sync + 'static,
        Build: FnOnce(Context, OperationPath) -> Arc<S>,
    {
        if let Some(existing) = self.inner.cache.get(&path) {
            match existing.typed.downcast::<S>() {
                Ok(store) => return store,
                Err(_) => {
                    let warning = RuntimeError::StoreTypeMismatch {
                        path: path.to_string(),
                    };
                    tracing::warn!(%warning, "store type mismatch at path; returning an uncached store");
                    let ctx = self.context_for_new_store();
                    return build(ctx, path);
                }
            }
        }
        let ctx = self.context_for_new_store();
        let store = build(ctx, path.clone());
        self.inner.cache.insert(
            path,
            StoreEntry {
                erased: store.clone(),
                typed: store.clone(),
            },
        );
        tracing::debug!("store created");
        store
    }

    /// Get or lazily create the query store at `path`, wrapping
    /// `request` in the default policy (`spec.md` §4.7, §6).
    pub fn query_store<R>(
        &self,
        path: OperationPath,
        request: R,
        initial_value: Option<R::Value>,
    ) -> Arc<QueryStore<DefaultQueryChain<R>>>
    where
        R: QueryRequest,
    {
        let wrapped = self.inner.policy.lock().clone().wrap_query(request);
        self.get_or_create(path, move |ctx, path| {
            QueryStore::new(wrapped, initial_value, ctx, path)
        })
    }

    /// Get or lazily create the query store at `path` from an
    /// already-assembled request chain, bypassing the default policy
    /// entirely — the escape hatch `spec.md` §4.7's "pluggable
    /// `StoreCreator`" is expressed as here (see [`DefaultPolicy`]).
    pub fn query_store_raw<R: Request>(
        &self,
        path: OperationPath,
        request: R,
        initial_value: Option<R::Value>,
    ) -> Arc<QueryStore<R>> {
        self.get_or_create(path, move |ctx, path| {
            QueryStore::new(request, initial_value, ctx, path)
        })
    }

    /// Get or lazily create the paginated store at `path`, wrapping
    /// `request` in the default policy.
    pub fn paginated_store<R>(
        &self,
        path: OperationPath,
        request: R,
    ) -> Arc<PaginatedStore<R::PageId, R::PageValue, R::Failure, DefaultPaginatedChain<R>>>
    where
        R: PaginatedRequest,
    {
        let initial_page_id = request.initial_page_id();
        let wrapped = self.inner.policy.lock().clone().wrap_paginated(request);
        self.get_or_create(path, move |ctx, path| {
            PaginatedStore::new(wrapped, initial_page_id, ctx, path)
        })
    }

    /// Paginated store construction bypassing the default policy.
    pub fn paginated_store_raw<PID, PV, E, R>(
        &self,
        path: OperationPath,
        request: R,
        initial_page_id: PID,
    ) -> Arc<PaginatedStore<PID, PV, E, R>>
    where
        PID: Clone + Eq + Send + Sync + 'static,
        PV: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        R: Request<Value = crate::request::paginated::PageResult<PID, PV>, Failure = E>,
    {
        self.get_or_create(path, move |ctx, path| {
            PaginatedStore::new(request, initial_page_id, ctx, path)
        })
    }

    /// Get or lazily create the mutation store at `path`, wrapping
    /// `request` in the default policy.
    pub fn mutation_store<R>(
        &self,
        path: OperationPath,
        request: R,
        initial_value: Option<R::Value>,
    ) -> Arc<MutationStore<R::Arguments, DefaultMutationChain<R>>>
    where
        R: MutationRequest,
    {
        let wrapped = self.inner.policy.lock().clone().wrap_mutation(request);
        self.get_or_create(path, move |ctx, path| {
            MutationStore::new(wrapped, initial_value, ctx, path)
        })
    }

    /// Mutation store construction bypassing the default policy.
    pub fn mutation_store_raw<A, R>(
        &self,
        path: OperationPath,
        request: R,
        initial_value: Option<R::Value>,
    ) -> Arc<MutationStore<A, R>>
    where
        A: Clone + Send + Sync + 'static,
        R: Request,
    {
        self.get_or_create(path, move |ctx, path| {
            MutationStore::new(request, initial_value, ctx, path)
        })
    }

    /// Exact-match, type-erased accessor (`spec.md` §4.7).
    pub fn store(&self, path: &OperationPath) -> Option<Arc<dyn AnyStore>> {
        self.inner.cache.get(path).map(|e| e.erased)
    }

    /// Every store whose path `prefix` is a prefix of (`spec.md` §4.7,
    /// §8 "Prefix matching").
    pub fn stores_matching(&self, prefix: &OperationPath) -> Vec<Arc<dyn AnyStore>> {
        self.inner
            .cache
            .all()
            .into_iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .map(|(_, entry)| entry.erased)
            .collect()
    }

    /// Like [`Client::stores_matching`], downcast to a concrete store
    /// type `S` (`spec.md` §4.7: "stores(matching: path, of: State)").
    /// Stores at matching paths of a different concrete type are
    /// silently excluded, not warned about — that warning is reserved
    /// for the single-path lookup in [`Client::query_store`] and its
    /// siblings, where exactly one type was ever expected.
    pub fn stores_matching_as<S: 'static>(&self, prefix: &OperationPath) -> Vec<Arc<S>> {
        self.inner
            .cache
            .all()
            .into_iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .filter_map(|(_, entry)| entry.typed.downcast::<S>().ok())
            .collect()
    }

    /// Remove and evict the store at exactly `path`, if any.
    pub fn clear_store(&self, path: &OperationPath) {
        if let Some(entry) = self.inner.cache.remove(path) {
            entry.erased.evict();
        }
    }

    /// Remove and evict every store whose path `prefix` is a prefix of.
    pub fn clear_stores_matching(&self, prefix: &OperationPath) {
        for (path, entry) in self.inner.cache.all() {
            if prefix.is_prefix_of(&path) {
                self.inner.cache.remove(&path);
                entry.erased.evict();
            }
        }
    }

    /// Scoped bulk editor (`spec.md` §4.7: "reconciles additions and
    /// deletions under the client lock"). `perform` receives every
    /// matching `(path, entry)` pair as a mutable `Vec`; entries it
    /// removes from the vec are evicted and dropped from the cache,
    /// entries it leaves or pushes are (re-)inserted.
    pub fn with_stores(
        &self,
        prefix: &OperationPath,
        perform: impl FnOnce(&mut Vec<(OperationPath, StoreEntry)>),
    ) {
        let before: Vec<(OperationPath, StoreEntry)> = self
            .inner
            .cache
            .all()
            .into_iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .collect();
        let before_paths: HashSet<OperationPath> =
            before.iter().map(|(path, _)| path.clone()).collect();

        let mut after = before;
        perform(&mut after);

        let after_paths: HashSet<OperationPath> =
            after.iter().map(|(path, _)| path.clone()).collect();

        for path in before_paths.difference(&after_paths) {
            if let Some(entry) = self.inner.cache.remove(path) {
                entry.erased.evict();
            }
        }
        for (path, entry) in after {
            self.inner.cache.insert(path, entry);
        }
    }

    /// The context new stores are seeded with. Mutating it only affects
    /// stores created after the change (`spec.md` §4.7).
    pub fn default_context(&self) -> Context {
        self.inner.default_context.lock().clone()
    }

    /// Replace the default context for future store creations.
    pub fn set_default_context(&self, context: Context) {
        *self.inner.default_context.lock() = context;
    }

    /// React to a system memory-pressure signal by delegating to the
    /// configured [`StoreCache`] (`spec.md` §3, "Lifecycle"; §4.7).
    pub fn handle_memory_pressure(&self) {
        tracing::info!("memory pressure signal received; evicting cached stores");
        self.inner.cache.on_memory_pressure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::Continuation;
    use crate::request::Request;
    use crate::task::Isolation;
    use async_trait::async_trait;

    struct Answer(i32);

    #[async_trait]
    impl Request for Answer {
        type Value = i32;
        type Failure = String;

        async fn run(
            &self,
            _isolation: Isolation,
            _context: Context,
            _continuation: Continuation<i32, String>,
        ) -> Result<i32, String> {
            Ok(self.0)
        }
    }

    impl QueryRequest for Answer {}

    fn path(name: &'static str) -> OperationPath {
        OperationPath::from_elements([name.into()])
    }

    #[test]
    fn store_with_path_is_idempotent() {
        let client = Client::new(RuntimeConfig::for_tests());
        let a = client.query_store(path("answer"), Answer(1), None);
        let b = client.query_store(path("answer"), Answer(2), None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn fetch_through_client_default_policy() {
        let client = Client::new(RuntimeConfig::for_tests());
        let store = client.query_store(path("answer"), Answer(42), None);
        assert_eq!(store.fetch().await, Ok(42));
    }

    #[test]
    fn prefix_matching_s4() {
        let client = Client::new(RuntimeConfig::for_tests());
        client.query_store(
            OperationPath::from_elements(["friends".into(), 1i64.into()]),
            Answer(1),
            None,
        );
        client.query_store(
            OperationPath::from_elements(["friends".into(), 2i64.into()]),
            Answer(2),
            None,
        );
        client.query_store(OperationPath::from_elements(["other".into()]), Answer(3), None);

        let friends_prefix = OperationPath::from_elements(["friends".into()]);
        assert_eq!(client.stores_matching(&friends_prefix).len(), 2);
        assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 3);

        client.clear_stores_matching(&friends_prefix);
        assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 1);
        assert!(client.store(&friends_prefix).is_none());
    }

    #[test]
    fn differing_request_type_at_same_path_is_not_cached_over() {
        struct OtherAnswer(&'static str);

        #[async_trait]
        impl Request for OtherAnswer {
            type Value = &'static str;
            type Failure = ();

            async fn run(
                &self,
                _isolation: Isolation,
                _context: Context,
                _continuation: Continuation<&'static str, ()>,
            ) -> Result<&'static str, ()> {
                Ok(self.0)
            }
        }

        let client = Client::new(RuntimeConfig::for_tests());
        let _a = client.query_store_raw(path("shared"), Answer(1), None);
        let b = client.query_store_raw(path("shared"), OtherAnswer("x"), None);
        // A fresh, uncached store was handed back rather than a panic or
        // a silently-wrong downcast.
        assert_eq!(b.current_value(), None);
        assert_eq!(client.store(&path("shared")).unwrap().subscriber_count(), 0);
    }

    #[test]
    fn memory_pressure_clears_the_cache() {
        let client = Client::new(RuntimeConfig::for_tests());
        client.query_store(path("answer"), Answer(1), None);
        assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 1);
        client.handle_memory_pressure();
        assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 0);
    }
}
