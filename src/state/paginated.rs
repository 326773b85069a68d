//! `PaginatedState` — an ordered, unique-by-id sequence of pages plus the
//! four task pools that can be concurrently fetching it (`spec.md` §3,
//! §4.4).

use crate::request::paginated::PageResult;
use crate::state::{derive_status, OperationStatus, ResetEffect, StatusInputs};
use crate::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A single fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<PID, PV> {
    pub id: PID,
    pub value: PV,
}

/// The four task pools a paginated state tracks, grounded on `spec.md`
/// §4.4's scheduling rules: `AllPages` waits on every other pool;
/// `NextPage`/`PreviousPage` wait on `InitialPage` and `AllPages` but not
/// on each other.
#[derive(Default)]
struct TaskPools<PID, PV, E> {
    all_pages: Vec<Arc<Task<Vec<Page<PID, PV>>, E>>>,
    initial_page: Vec<Arc<Task<Page<PID, PV>, E>>>,
    next_page: Vec<Arc<Task<Page<PID, PV>, E>>>,
    previous_page: Vec<Arc<Task<Page<PID, PV>, E>>>,
}

/// The state backing a paginated request.
pub struct PaginatedState<PID, PV, E> {
    current: Vec<Page<PID, PV>>,
    initial_page_id: PID,
    next_page_id: Option<PID>,
    previous_page_id: Option<PID>,
    value_update_count: u64,
    value_last_updated_at: Option<DateTime<Utc>>,
    error: Option<E>,
    error_update_count: u64,
    error_last_updated_at: Option<DateTime<Utc>>,
    tasks: TaskPools<PID, PV, E>,
}

impl<PID, PV, E> PaginatedState<PID, PV, E>
where
    PID: Clone + PartialEq + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A fresh, empty state for a request whose first page is
    /// `initial_page_id`.
    pub fn new(initial_page_id: PID) -> Self {
        Self {
            current: Vec::new(),
            initial_page_id,
            next_page_id: None,
            previous_page_id: None,
            value_update_count: 0,
            value_last_updated_at: None,
            error: None,
            error_update_count: 0,
            error_last_updated_at: None,
            tasks: TaskPools::default(),
        }
    }

    /// The id the next `InitialPage` fetch should use.
    pub fn initial_page_id(&self) -> &PID {
        &self.initial_page_id
    }

    /// The pages currently held, in order.
    pub fn current(&self) -> &[Page<PID, PV>] {
        &self.current
    }

    /// The current error, if any.
    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// `true` iff a further page can be fetched after the last held page
    /// (`spec.md` §3: `has_next ⇔ current empty || next_page_id.is_some()`).
    pub fn has_next(&self) -> bool {
        self.current.is_empty() || self.next_page_id.is_some()
    }

    /// `true` iff a further page can be fetched before the first held page.
    pub fn has_previous(&self) -> bool {
        self.current.is_empty() || self.previous_page_id.is_some()
    }

    pub fn next_page_id(&self) -> Option<&PID> {
        self.next_page_id.as_ref()
    }

    pub fn previous_page_id(&self) -> Option<&PID> {
        self.previous_page_id.as_ref()
    }

    /// `true` while any task pool is non-empty.
    pub fn is_loading(&self) -> bool {
        !self.tasks.all_pages.is_empty()
            || !self.tasks.initial_page.is_empty()
            || !self.tasks.next_page.is_empty()
            || !self.tasks.previous_page.is_empty()
    }

    pub fn status(&self) -> OperationStatus<Vec<Page<PID, PV>>, E> {
        derive_status(StatusInputs {
            is_loading: self.is_loading(),
            value_update_count: self.value_update_count,
            error_update_count: self.error_update_count,
            value_last_updated_at: self.value_last_updated_at,
            error_last_updated_at: self.error_last_updated_at,
            current: &Some(self.current.clone()),
            error: &self.error,
        })
    }

    /// Dependencies a new task of the given kind must wait on, per
    /// `spec.md` §4.4.
    pub fn all_pages_prerequisites(&self) -> Vec<Arc<dyn crate::task::TaskDependency>> {
        let mut deps: Vec<Arc<dyn crate::task::TaskDependency>> = Vec::new();
        deps.extend(self.tasks.initial_page.iter().cloned().map(|t| t as _));
        deps.extend(self.tasks.next_page.iter().cloned().map(|t| t as _));
        deps.extend(self.tasks.previous_page.iter().cloned().map(|t| t as _));
        deps
    }

    /// Dependencies a new `NextPage`/`PreviousPage` task must wait on.
    pub fn single_page_prerequisites(&self) -> Vec<Arc<dyn crate::task::TaskDependency>> {
        let mut deps: Vec<Arc<dyn crate::task::TaskDependency>> = Vec::new();
        deps.extend(self.tasks.initial_page.iter().cloned().map(|t| t as _));
        deps.extend(self.tasks.all_pages.iter().cloned().map(|t| t as _));
        deps
    }

    pub fn register_initial_page_task(&mut self, task: Arc<Task<Page<PID, PV>, E>>) {
        self.tasks.initial_page.push(task);
    }

    pub fn register_next_page_task(&mut self, task: Arc<Task<Page<PID, PV>, E>>) {
        self.tasks.next_page.push(task);
    }

    pub fn register_previous_page_task(&mut self, task: Arc<Task<Page<PID, PV>, E>>) {
        self.tasks.previous_page.push(task);
    }

    pub fn register_all_pages_task(&mut self, task: Arc<Task<Vec<Page<PID, PV>>, E>>) {
        self.tasks.all_pages.push(task);
    }

    pub fn finish_initial_page_task(&mut self, id: TaskId) {
        self.tasks.initial_page.retain(|t| t.id() != id);
    }

    pub fn finish_next_page_task(&mut self, id: TaskId) {
        self.tasks.next_page.retain(|t| t.id() != id);
    }

    pub fn finish_previous_page_task(&mut self, id: TaskId) {
        self.tasks.previous_page.retain(|t| t.id() != id);
    }

    pub fn finish_all_pages_task(&mut self, id: TaskId) {
        self.tasks.all_pages.retain(|t| t.id() != id);
    }

    /// Ingest a successful `InitialPage` fetch: replaces the held pages
    /// with `[page]` and recomputes both edges from the caller-supplied
    /// ids (`spec.md` §4.5).
    pub fn ingest_initial_page(
        &mut self,
        page: Page<PID, PV>,
        next_page_id: Option<PID>,
        previous_page_id: Option<PID>,
        at: DateTime<Utc>,
    ) {
        self.current = vec![page];
        self.next_page_id = next_page_id;
        self.previous_page_id = previous_page_id;
        self.value_update_count = self.value_update_count.saturating_add(1);
        self.value_last_updated_at = Some(at);
    }

    /// Ingest a successful `NextPage` fetch: appends and recomputes only
    /// `next_page_id` (the leading edge is untouched, per §4.5).
    pub fn ingest_next_page(
        &mut self,
        page: Page<PID, PV>,
        next_page_id: Option<PID>,
        at: DateTime<Utc>,
    ) {
        self.current.push(page);
        self.next_page_id = next_page_id;
        self.value_update_count = self.value_update_count.saturating_add(1);
        self.value_last_updated_at = Some(at);
    }

    /// Ingest a successful `PreviousPage` fetch: prepends and recomputes
    /// only `previous_page_id`.
    pub fn ingest_previous_page(
        &mut self,
        page: Page<PID, PV>,
        previous_page_id: Option<PID>,
        at: DateTime<Utc>,
    ) {
        self.current.insert(0, page);
        self.previous_page_id = previous_page_id;
        self.value_update_count = self.value_update_count.saturating_add(1);
        self.value_last_updated_at = Some(at);
    }

    /// Ingest a successful `AllPages` fetch: wholesale replacement.
    /// `next_page_id`/`previous_page_id` are recomputed by the caller
    /// (the orchestrator in `request::paginated`, which knows the paging
    /// trait's `page_id_after`/`page_id_before`) and passed in.
    pub fn ingest_all_pages(
        &mut self,
        pages: Vec<Page<PID, PV>>,
        next_page_id: Option<PID>,
        previous_page_id: Option<PID>,
        at: DateTime<Utc>,
    ) {
        self.current = pages;
        self.next_page_id = next_page_id;
        self.previous_page_id = previous_page_id;
        self.value_update_count = self.value_update_count.saturating_add(1);
        self.value_last_updated_at = Some(at);
    }

    pub fn ingest_error(&mut self, error: E, at: DateTime<Utc>) {
        self.error = Some(error);
        self.error_update_count = self.error_update_count.saturating_add(1);
        self.error_last_updated_at = Some(at);
    }

    /// Reset to an empty page list, returning cancellations for every
    /// task across all four pools.
    pub fn reset(&mut self) -> ResetEffect {
        let mut cancel = Vec::new();
        cancel.extend(self.tasks.all_pages.drain(..).map(|t| t.subscription()));
        cancel.extend(self.tasks.initial_page.drain(..).map(|t| t.subscription()));
        cancel.extend(self.tasks.next_page.drain(..).map(|t| t.subscription()));
        cancel.extend(
            self.tasks
                .previous_page
                .drain(..)
                .map(|t| t.subscription()),
        );
        self.current = Vec::new();
        self.next_page_id = None;
        self.previous_page_id = None;
        self.value_update_count = 0;
        self.value_last_updated_at = None;
        self.error = None;
        self.error_update_count = 0;
        self.error_last_updated_at = None;
        ResetEffect { cancel }
    }
}
