//! `PaginatedStore` — the per-operation runtime for a paged fetch
//! (`spec.md` §4.6).
//!
//! The wrapped request's `Value` is always [`PageResult`], the shape
//! common to every paging mode (`spec.md` §4.5); this store narrows each
//! scheduled task's result down to the page shape its pool actually
//! tracks (a single [`Page`] for `initial_page`/`next_page`/
//! `previous_page`, a `Vec<Page>` for `all_pages`) and relies on the
//! adapter's own `continuation.yield_value` call — which always carries
//! the full [`PageResult`], ids included — to do the actual state
//! ingestion. The narrowed terminal result is used only to learn whether
//! the run succeeded, failed, or was cancelled.

use crate::context::Context;
use crate::continuation::Continuation;
use crate::controller::{controllers, ControlSink, Controls};
use crate::error::OperationFailure;
use crate::modifier::auto_run::automatic_running_enabled;
use crate::modifier::events::{dispatch_result, with_event_handlers, EventHandlers};
use crate::modifier::rerun::rerun_specs;
use crate::modifier::stale::is_stale;
use crate::path::OperationPath;
use crate::request::paginated::{with_all_pages_count, with_paging_request, PageResult, PagingRequest};
use crate::request::Request;
use crate::state::paginated::{Page, PaginatedState};
use crate::state::OperationStatus;
use crate::store::{AnyStore, StateChangeHandler, Subscribers};
use crate::subscription::Subscription;
use crate::task::{Task, TaskConfig, TaskDependency, TaskId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, Weak};

/// The runtime for a single paged request. `PID`/`PV` are the page id and
/// page value types; `R` is the assembled request chain whose `Value` is
/// [`PageResult<PID, PV>`] (built by wrapping a
/// [`crate::request::paginated::PaginatedRequest`] in
/// [`crate::request::paginated::PaginatedAdapter`]).
pub struct PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    self_weak: Weak<Self>,
    path: OperationPath,
    request: R,
    base_context: Mutex<Context>,
    state: Mutex<PaginatedState<PID, PV, E>>,
    subscribers: Subscribers,
    auxiliary: Mutex<Vec<Subscription>>,
    auto_run_task: Mutex<Option<Arc<Task<Page<PID, PV>, E>>>>,
}

impl<PID, PV, E, R> PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    pub fn new(
        request: R,
        initial_page_id: PID,
        mut base_context: Context,
        path: OperationPath,
    ) -> Arc<Self> {
        request.setup(&mut base_context);
        let rerun = rerun_specs(&base_context);
        let installed_controllers = controllers::<Vec<Page<PID, PV>>, E>(&base_context);

        Arc::new_cyclic(|weak| {
            let mut auxiliary = Vec::new();
            for spec in &rerun {
                let weak_cb = weak.clone();
                auxiliary.push(spec.observe_changes(Arc::new(move |satisfied: bool| {
                    if satisfied {
                        if let Some(store) = weak_cb.upgrade() {
                            store.schedule_automatic_run();
                        }
                    }
                })));
            }
            for controller in &installed_controllers {
                let weak_dyn: Weak<dyn ControlSink<Vec<Page<PID, PV>>, E>> = weak.clone();
                auxiliary.push(controller.control(Controls::new(weak_dyn)));
            }

            Self {
                self_weak: weak.clone(),
                path,
                request,
                base_context: Mutex::new(base_context),
                state: Mutex::new(PaginatedState::new(initial_page_id)),
                subscribers: Subscribers::new(),
                auxiliary: Mutex::new(auxiliary),
                auto_run_task: Mutex::new(None),
            }
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("store method invoked while the store itself is being dropped")
    }

    fn publish(&self) {
        self.subscribers.notify();
    }

    fn ingest_page_result(&self, result: PageResult<PID, PV>, at: chrono::DateTime<chrono::Utc>) {
        let mut state = self.state.lock();
        match result {
            PageResult::InitialPage {
                page,
                next_page_id,
                previous_page_id,
            } => state.ingest_initial_page(page, next_page_id, previous_page_id, at),
            PageResult::NextPage { page, next_page_id } => {
                state.ingest_next_page(page, next_page_id, at)
            }
            PageResult::PreviousPage {
                page,
                previous_page_id,
            } => state.ingest_previous_page(page, previous_page_id, at),
            PageResult::AllPages {
                pages,
                next_page_id,
                previous_page_id,
            } => state.ingest_all_pages(pages, next_page_id, previous_page_id, at),
        }
    }

    fn make_continuation(&self, ctx: Context) -> Continuation<PageResult<PID, PV>, E> {
        let store = self.arc();
        Continuation::new(ctx, move |result, run_ctx, reason| {
            dispatch_result(&run_ctx, &result, reason);
            let at = run_ctx.clock().now();
            match result {
                Ok(page_result) => store.ingest_page_result(page_result, at),
                Err(error) => store.state.lock().ingest_error(error, at),
            }
            store.publish();
        })
    }

    async fn drive_single(
        &self,
        task: Arc<Task<Page<PID, PV>, E>>,
        ctx: Context,
        extract: impl Fn(PageResult<PID, PV>) -> Page<PID, PV> + Send,
    ) -> Option<Result<Page<PID, PV>, E>> {
        let continuation = self.make_continuation(ctx.clone());
        let isolation = task.isolation();
        let body = async {
            self.request
                .run(isolation, ctx.clone(), continuation)
                .await
                .map(extract)
        };
        task.clone().run_if_needed(body).await
    }

    async fn drive_all(
        &self,
        task: Arc<Task<Vec<Page<PID, PV>>, E>>,
        ctx: Context,
    ) -> Option<Result<Vec<Page<PID, PV>>, E>> {
        let continuation = self.make_continuation(ctx.clone());
        let isolation = task.isolation();
        let body = async {
            self.request
                .run(isolation, ctx.clone(), continuation)
                .await
                .map(|result| match result {
                    PageResult::AllPages { pages, .. } => pages,
                    _ => Vec::new(),
                })
        };
        task.clone().run_if_needed(body).await
    }

    /// Drive one `InitialPage`/`NextPage`/`PreviousPage` task end to end:
    /// register it in its pool, run it, deregister it, and fold the
    /// outcome back into state. The three single-page paging modes share
    /// this shape and differ only in which pool and extractor they use.
    #[allow(clippy::too_many_arguments)]
    async fn run_single_page(
        &self,
        ctx: Context,
        prerequisites: Vec<Arc<dyn TaskDependency>>,
        default_name: &'static str,
        register: impl FnOnce(&mut PaginatedState<PID, PV, E>, Arc<Task<Page<PID, PV>, E>>),
        finish: impl FnOnce(&mut PaginatedState<PID, PV, E>, TaskId),
        extract: impl Fn(PageResult<PID, PV>) -> Page<PID, PV> + Send,
        track_as_auto: bool,
    ) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        let task_config = TaskConfig::new(ctx.clone()).default_name(default_name);
        let task: Arc<Task<Page<PID, PV>, E>> = Task::new(task_config, prerequisites);
        register(&mut self.state.lock(), task.clone());
        if track_as_auto {
            *self.auto_run_task.lock() = Some(task.clone());
        }
        self.publish();

        let outcome = self.drive_single(task.clone(), ctx.clone(), extract).await;
        finish(&mut self.state.lock(), task.id());
        if let Some(Err(error)) = &outcome {
            self.state
                .lock()
                .ingest_error(error.clone(), ctx.clock().now());
        }
        if track_as_auto {
            let mut guard = self.auto_run_task.lock();
            if guard.as_ref().map(|t| t.id()) == Some(task.id()) {
                *guard = None;
            }
        }
        self.publish();

        match outcome {
            Some(Ok(_)) => Ok(self.state.lock().current().to_vec()),
            Some(Err(error)) => Err(OperationFailure::Operation(error)),
            None => Err(OperationFailure::Cancelled),
        }
    }

    /// The primitive every paging mode drives through: install the
    /// per-call event handler and the paging request into context, then
    /// dispatch to the pool the mode belongs to (`spec.md` §4.5, §4.6).
    async fn execute(
        &self,
        paging: PagingRequest<PID>,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<PageResult<PID, PV>, E>>>,
        track_as_auto: bool,
    ) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        let mut ctx = ctx_override.unwrap_or_else(|| self.base_context.lock().clone());
        with_event_handlers(&mut ctx, handler);
        with_paging_request(&mut ctx, paging.clone());

        match paging {
            PagingRequest::AllPages => {
                let count = self.state.lock().current().len().max(1);
                with_all_pages_count(&mut ctx, count);

                let prerequisites = self.state.lock().all_pages_prerequisites();
                let task_config = TaskConfig::new(ctx.clone()).default_name("all_pages");
                let task: Arc<Task<Vec<Page<PID, PV>>, E>> = Task::new(task_config, prerequisites);
                self.state.lock().register_all_pages_task(task.clone());
                self.publish();

                let outcome = self.drive_all(task.clone(), ctx.clone()).await;
                self.state.lock().finish_all_pages_task(task.id());
                if let Some(Err(error)) = &outcome {
                    self.state
                        .lock()
                        .ingest_error(error.clone(), ctx.clock().now());
                }
                self.publish();

                match outcome {
                    Some(Ok(_)) => Ok(self.state.lock().current().to_vec()),
                    Some(Err(error)) => Err(OperationFailure::Operation(error)),
                    None => Err(OperationFailure::Cancelled),
                }
            }
            PagingRequest::InitialPage => {
                let prerequisites = self.state.lock().single_page_prerequisites();
                self.run_single_page(
                    ctx,
                    prerequisites,
                    "initial_page",
                    |state, task| state.register_initial_page_task(task),
                    |state, id| state.finish_initial_page_task(id),
                    |result| match result {
                        PageResult::InitialPage { page, .. } => page,
                        _ => unreachable!(
                            "InitialPage paging mode always returns PageResult::InitialPage"
                        ),
                    },
                    track_as_auto,
                )
                .await
            }
            PagingRequest::NextPage(_) => {
                let prerequisites = self.state.lock().single_page_prerequisites();
                self.run_single_page(
                    ctx,
                    prerequisites,
                    "next_page",
                    |state, task| state.register_next_page_task(task),
                    |state, id| state.finish_next_page_task(id),
                    |result| match result {
                        PageResult::NextPage { page, .. } => page,
                        _ => unreachable!(
                            "NextPage paging mode always returns PageResult::NextPage"
                        ),
                    },
                    false,
                )
                .await
            }
            PagingRequest::PreviousPage(_) => {
                let prerequisites = self.state.lock().single_page_prerequisites();
                self.run_single_page(
                    ctx,
                    prerequisites,
                    "previous_page",
                    |state, task| state.register_previous_page_task(task),
                    |state, id| state.finish_previous_page_task(id),
                    |result| match result {
                        PageResult::PreviousPage { page, .. } => page,
                        _ => unreachable!(
                            "PreviousPage paging mode always returns PageResult::PreviousPage"
                        ),
                    },
                    false,
                )
                .await
            }
        }
    }

    fn schedule_automatic_run(self: Arc<Self>) {
        tokio::spawn(async move {
            let _ = self
                .execute(PagingRequest::InitialPage, None, None, true)
                .await;
        });
    }

    fn cancel_automatic_run(&self) {
        if let Some(task) = self.auto_run_task.lock().take() {
            task.cancel();
        }
    }

    /// Run one paging mode to completion, returning the terminal pages
    /// (`spec.md` §4.6: `run`). `fetch`, `fetch_next_page`,
    /// `fetch_previous_page`, and `refetch_all_pages` are thin wrappers
    /// over this that pick the mode and, for the edge-following pair,
    /// short-circuit when there is no further page to fetch.
    pub async fn run(
        &self,
        paging: PagingRequest<PID>,
        ctx_override: Option<Context>,
        handler: Option<Arc<EventHandlers<PageResult<PID, PV>, E>>>,
    ) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        self.execute(paging, ctx_override, handler, false).await
    }

    /// Fetch the first page, replacing whatever pages are currently held
    /// (`spec.md` §4.5: `InitialPage`).
    pub async fn fetch(&self) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        self.run(PagingRequest::InitialPage, None, None).await
    }

    /// Fetch and append the page after the last one currently held. A
    /// no-op returning the current pages if there is no next page
    /// (`spec.md` §4.5: `NextPage`).
    pub async fn fetch_next_page(&self) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        let Some(next_id) = self.state.lock().next_page_id().cloned() else {
            return Ok(self.state.lock().current().to_vec());
        };
        self.run(PagingRequest::NextPage(next_id), None, None).await
    }

    /// Fetch and prepend the page before the first one currently held. A
    /// no-op returning the current pages if there is no previous page
    /// (`spec.md` §4.5: `PreviousPage`).
    pub async fn fetch_previous_page(&self) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        let Some(previous_id) = self.state.lock().previous_page_id().cloned() else {
            return Ok(self.state.lock().current().to_vec());
        };
        self.run(PagingRequest::PreviousPage(previous_id), None, None)
            .await
    }

    /// Re-fetch every page currently held, one at a time from the first
    /// page, for as many pages as are currently held (`spec.md` §4.5:
    /// `AllPages`).
    pub async fn refetch_all_pages(&self) -> Result<Vec<Page<PID, PV>>, OperationFailure<E>> {
        self.run(PagingRequest::<PID>::AllPages, None, None).await
    }

    /// Restore to an empty page list, cancelling every active task across
    /// all four pools (`spec.md` §4.6).
    pub fn reset_state(&self) {
        let effect = self.state.lock().reset();
        effect.apply();
        *self.auto_run_task.lock() = None;
        self.publish();
    }

    pub fn subscribe(self: &Arc<Self>, handler: StateChangeHandler) -> Subscription {
        let (id, count_before) = self.subscribers.add(handler);
        if count_before == 0 {
            let ctx = self.base_context.lock().clone();
            if is_stale(&ctx) && automatic_running_enabled(&ctx) {
                self.clone().schedule_automatic_run();
            }
        }
        let store = self.clone();
        Subscription::new(move || {
            let remaining = store.subscribers.remove(id);
            if remaining == 0 {
                store.cancel_automatic_run();
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    pub fn state(&self) -> OperationStatus<Vec<Page<PID, PV>>, E> {
        self.state.lock().status()
    }

    /// The pages currently held, oldest first.
    pub fn current_pages(&self) -> Vec<Page<PID, PV>> {
        self.state.lock().current().to_vec()
    }

    pub fn has_next(&self) -> bool {
        self.state.lock().has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.state.lock().has_previous()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading()
    }

    pub fn is_stale(&self) -> bool {
        is_stale(&self.base_context.lock())
    }

    pub fn context(&self) -> Context {
        self.base_context.lock().clone()
    }

    pub fn path(&self) -> &OperationPath {
        &self.path
    }

    pub fn with_exclusive_access<T>(
        &self,
        f: impl FnOnce(&mut PaginatedState<PID, PV, E>) -> T,
    ) -> T {
        f(&mut self.state.lock())
    }

    fn teardown(&self) {
        for sub in self.auxiliary.lock().drain(..) {
            sub.cancel();
        }
        self.state.lock().reset().apply();
    }
}

impl<PID, PV, E, R> Drop for PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<PID, PV, E, R> std::fmt::Debug for PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedStore")
            .field("path", &self.path)
            .field("subscribers", &self.subscribers.count())
            .field("loading", &self.state.lock().is_loading())
            .finish()
    }
}

impl<PID, PV, E, R> AnyStore for PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    fn path(&self) -> &OperationPath {
        &self.path
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    fn is_loading(&self) -> bool {
        self.state.lock().is_loading()
    }

    fn evict(&self) {
        self.teardown();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl<PID, PV, E, R> ControlSink<Vec<Page<PID, PV>>, E> for PaginatedStore<PID, PV, E, R>
where
    PID: Clone + Eq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    R: Request<Value = PageResult<PID, PV>, Failure = E>,
{
    fn yield_now(&self, result: Result<Vec<Page<PID, PV>>, E>, context: Option<Context>) {
        let ctx = context.unwrap_or_else(|| self.base_context.lock().clone());
        let at = ctx.clock().now();
        match result {
            Ok(pages) => self.state.lock().ingest_all_pages(pages, None, None, at),
            Err(error) => self.state.lock().ingest_error(error, at),
        }
        self.publish();
    }

    fn can_yield_refetch(&self) -> bool {
        automatic_running_enabled(&self.base_context.lock())
    }

    async fn yield_refetch(
        &self,
        _context: Option<Context>,
    ) -> Option<Result<Vec<Page<PID, PV>>, E>> {
        if !self.can_yield_refetch() {
            return None;
        }
        match self.refetch_all_pages().await {
            Ok(pages) => Some(Ok(pages)),
            Err(OperationFailure::Operation(error)) => Some(Err(error)),
            Err(OperationFailure::Cancelled) => None,
        }
    }

    fn context(&self) -> Context {
        self.context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::paginated::{PaginatedAdapter, PaginatedRequest};
    use async_trait::async_trait;

    struct Numbered {
        max: u32,
    }

    #[async_trait]
    impl PaginatedRequest for Numbered {
        type PageId = u32;
        type PageValue = String;
        type Failure = String;

        fn initial_page_id(&self) -> u32 {
            0
        }

        fn page_id_after(
            &self,
            pages: &[Page<u32, String>],
            _paging: &PagingRequest<u32>,
            _context: &Context,
        ) -> Option<u32> {
            let last = pages.last()?.id;
            if last >= self.max {
                None
            } else {
                Some(last + 1)
            }
        }

        fn page_id_before(
            &self,
            pages: &[Page<u32, String>],
            _paging: &PagingRequest<u32>,
            _context: &Context,
        ) -> Option<u32> {
            let first = pages.first()?.id;
            first.checked_sub(1)
        }

        async fn fetch_page(
            &self,
            page_id: u32,
            _paging: &PagingRequest<u32>,
            _context: &Context,
            _continuation: &Continuation<String, String>,
        ) -> Result<String, String> {
            Ok(format!("page-{page_id}"))
        }
    }

    fn path() -> OperationPath {
        OperationPath::from_elements(["numbered".into()])
    }

    fn store() -> Arc<PaginatedStore<u32, String, String, PaginatedAdapter<Numbered>>> {
        PaginatedStore::new(
            PaginatedAdapter(Numbered { max: 2 }),
            0,
            Context::new(),
            path(),
        )
    }

    #[tokio::test]
    async fn fetch_initial_page_computes_edges() {
        let store = store();
        let pages = store.fetch().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert!(store.has_next());
        assert!(!store.has_previous());
    }

    #[tokio::test]
    async fn fetch_next_page_appends_and_preserves_leading_edge() {
        let store = store();
        store.fetch().await.unwrap();
        let pages = store.fetch_next_page().await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(!store.has_previous());
    }

    #[tokio::test]
    async fn fetch_next_page_is_a_no_op_once_exhausted() {
        let store = store();
        store.fetch().await.unwrap();
        store.fetch_next_page().await.unwrap();
        store.fetch_next_page().await.unwrap();
        let pages = store.fetch_next_page().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert!(!store.has_next());
    }

    #[tokio::test]
    async fn refetch_all_pages_walks_from_the_start() {
        let store = store();
        store.fetch().await.unwrap();
        store.fetch_next_page().await.unwrap();
        let pages = store.refetch_all_pages().await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].id, 0);
        assert_eq!(pages[1].id, 1);
    }

    #[tokio::test]
    async fn reset_state_clears_pages_and_restores_both_edges() {
        let store = store();
        store.fetch().await.unwrap();
        store.reset_state();
        assert!(store.current_pages().is_empty());
        assert!(store.has_next());
        assert!(store.has_previous());
    }
}
