//! `PaginatedRequest` — the paged-fetch specialization and its
//! orchestration (`spec.md` §4.1, §4.5).
//!
//! A type implements [`PaginatedRequest`] directly (not [`Request`]); the
//! store wraps it in [`PaginatedAdapter`] to get a concrete [`Request`]
//! whose `run` dispatches on the paging mode recorded in the context. This
//! mirrors the teacher's own three-layer split (dumb backend / domain
//! logic / type-erased facade in `store/{backend,generic,mod}.rs`):
//! `PaginatedRequest` is the domain-shaped trait a caller writes, the
//! adapter is the facade the scheduler actually drives.

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::request::Request;
use crate::state::paginated::Page;
use crate::task::Isolation;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Which page(s) a run should fetch, recorded in the context by the
/// store's `fetch_next_page`/`fetch_previous_page`/`refetch_all_pages`
/// helpers before scheduling a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingRequest<PID> {
    InitialPage,
    NextPage(PID),
    PreviousPage(PID),
    AllPages,
}

struct PagingRequestKey<PID>(PhantomData<PID>);

impl<PID: Clone + Send + Sync + 'static> ContextKey for PagingRequestKey<PID> {
    type Value = Option<PagingRequest<PID>>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Read the paging mode a store helper installed in `context`, defaulting
/// to `InitialPage` (the shape a fresh `fetch()` call uses).
pub fn paging_request<PID: Clone + Send + Sync + 'static>(context: &Context) -> PagingRequest<PID> {
    context
        .get::<PagingRequestKey<PID>>()
        .unwrap_or(PagingRequest::InitialPage)
}

/// Install the paging mode a run should use. Called by
/// `Store::fetch_next_page` and friends before scheduling the task.
pub fn with_paging_request<PID: Clone + Send + Sync + 'static>(
    context: &mut Context,
    request: PagingRequest<PID>,
) {
    context.set::<PagingRequestKey<PID>>(Some(request));
}

/// The shape every paginated run's result takes, regardless of which
/// paging mode produced it (`spec.md` §4.5: "mapping each to the same
/// response shape").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResult<PID, PV> {
    InitialPage {
        page: Page<PID, PV>,
        next_page_id: Option<PID>,
        previous_page_id: Option<PID>,
    },
    NextPage {
        page: Page<PID, PV>,
        next_page_id: Option<PID>,
    },
    PreviousPage {
        page: Page<PID, PV>,
        previous_page_id: Option<PID>,
    },
    AllPages {
        pages: Vec<Page<PID, PV>>,
        next_page_id: Option<PID>,
        previous_page_id: Option<PID>,
    },
}

/// The paged-fetch specialization (`spec.md` §4.1).
#[async_trait]
pub trait PaginatedRequest: Send + Sync + 'static {
    /// The page identifier type (e.g. an offset, a cursor token).
    type PageId: Clone + Eq + Send + Sync + 'static;
    /// The value carried by a single fetched page.
    type PageValue: Clone + Send + Sync + 'static;
    /// The failure type shared by every page fetch.
    type Failure: Clone + Send + Sync + 'static;

    /// Idempotent per-store context preparation.
    fn setup(&self, _context: &mut Context) {}

    /// The id of the very first page.
    fn initial_page_id(&self) -> Self::PageId;

    /// Given the currently-known pages (oldest first) and the paging
    /// mode in effect, the id of the page after the last one — or `None`
    /// if there is no further page.
    fn page_id_after(
        &self,
        pages: &[Page<Self::PageId, Self::PageValue>],
        paging: &PagingRequest<Self::PageId>,
        context: &Context,
    ) -> Option<Self::PageId>;

    /// Symmetric: the id of the page before the first one.
    fn page_id_before(
        &self,
        pages: &[Page<Self::PageId, Self::PageValue>],
        paging: &PagingRequest<Self::PageId>,
        context: &Context,
    ) -> Option<Self::PageId>;

    /// Fetch a single page by id.
    async fn fetch_page(
        &self,
        page_id: Self::PageId,
        paging: &PagingRequest<Self::PageId>,
        context: &Context,
        continuation: &Continuation<Self::PageValue, Self::Failure>,
    ) -> Result<Self::PageValue, Self::Failure>;
}

/// Adapts a [`PaginatedRequest`] into a concrete [`Request`] whose `run`
/// dispatches on `context`'s recorded [`PagingRequest`] and assembles the
/// result per `spec.md` §4.5.
pub struct PaginatedAdapter<R>(pub R);

#[async_trait]
impl<R: PaginatedRequest> Request for PaginatedAdapter<R> {
    type Value = PageResult<R::PageId, R::PageValue>;
    type Failure = R::Failure;

    fn setup(&self, context: &mut Context) {
        self.0.setup(context);
    }

    async fn run(
        &self,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let paging = paging_request::<R::PageId>(&context);
        match paging.clone() {
            PagingRequest::InitialPage => {
                let id = self.0.initial_page_id();
                let value = self.fetch_mapped(id.clone(), &paging, &context).await?;
                let page = Page { id, value };
                let pages = [page.clone()];
                let next_page_id = self.0.page_id_after(&pages, &paging, &context);
                let previous_page_id = self.0.page_id_before(&pages, &paging, &context);
                let result = PageResult::InitialPage {
                    page,
                    next_page_id,
                    previous_page_id,
                };
                continuation.yield_value(result.clone());
                let _ = &isolation;
                Ok(result)
            }
            PagingRequest::NextPage(id) => {
                let value = self.fetch_mapped(id.clone(), &paging, &context).await?;
                let page = Page { id, value };
                let pages = [page.clone()];
                let next_page_id = self.0.page_id_after(&pages, &paging, &context);
                let result = PageResult::NextPage { page, next_page_id };
                continuation.yield_value(result.clone());
                Ok(result)
            }
            PagingRequest::PreviousPage(id) => {
                let value = self.fetch_mapped(id.clone(), &paging, &context).await?;
                let page = Page { id, value };
                let pages = [page.clone()];
                let previous_page_id = self.0.page_id_before(&pages, &paging, &context);
                let result = PageResult::PreviousPage {
                    page,
                    previous_page_id,
                };
                continuation.yield_value(result.clone());
                Ok(result)
            }
            PagingRequest::AllPages => {
                // Re-fetch as many pages as are currently recorded
                // (`context`'s caller populates the starting count via
                // `PaginatedAllPagesCount`); stop early if `page_id_after`
                // runs out before that count is exhausted.
                let target_count = context.get::<AllPagesCountKey>();
                let mut pages: Vec<Page<R::PageId, R::PageValue>> = Vec::new();
                let mut next_id = Some(self.0.initial_page_id());
                for _ in 0..target_count.max(1) {
                    let Some(id) = next_id.take() else { break };
                    let value = self.fetch_mapped(id.clone(), &paging, &context).await?;
                    pages.push(Page { id, value });
                    next_id = self.0.page_id_after(&pages, &paging, &context);
                    let previous_id = self.0.page_id_before(&pages, &paging, &context);
                    continuation.yield_value(PageResult::AllPages {
                        pages: pages.clone(),
                        next_page_id: next_id.clone(),
                        previous_page_id: previous_id,
                    });
                    if next_id.is_none() {
                        break;
                    }
                }
                let next_page_id = self.0.page_id_after(&pages, &paging, &context);
                let previous_page_id = self.0.page_id_before(&pages, &paging, &context);
                Ok(PageResult::AllPages {
                    pages,
                    next_page_id,
                    previous_page_id,
                })
            }
        }
    }
}

impl<R: PaginatedRequest> PaginatedAdapter<R> {
    async fn fetch_mapped(
        &self,
        id: R::PageId,
        paging: &PagingRequest<R::PageId>,
        context: &Context,
    ) -> Result<R::PageValue, R::Failure> {
        let page_continuation = Continuation::new(context.clone(), |_, _, _| {});
        self.0
            .fetch_page(id, paging, context, &page_continuation)
            .await
    }
}

struct AllPagesCountKey;

impl ContextKey for AllPagesCountKey {
    type Value = usize;

    fn default_value() -> Self::Value {
        0
    }
}

/// Record how many pages `refetch_all_pages` should walk, before
/// scheduling the task (`spec.md` §4.5: "for each of the existing
/// page-count iterations").
pub fn with_all_pages_count(context: &mut Context, count: usize) {
    context.set::<AllPagesCountKey>(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    struct Numbered;

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
            if last >= 2 {
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

    #[tokio::test]
    async fn initial_page_computes_both_edges() {
        let adapter = PaginatedAdapter(Numbered);
        let mut ctx = Context::new();
        adapter.setup(&mut ctx);
        let isolation = crate::task::Task::<
            PageResult<u32, String>,
            String,
        >::new(crate::task::TaskConfig::new(ctx.clone()), vec![])
        .isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = adapter.run(isolation, ctx, cont).await.unwrap();
        match result {
            PageResult::InitialPage {
                next_page_id,
                previous_page_id,
                ..
            } => {
                assert_eq!(next_page_id, Some(1));
                assert_eq!(previous_page_id, None);
            }
            _ => panic!("expected InitialPage"),
        }
    }

    #[tokio::test]
    async fn all_pages_stops_when_next_id_runs_out() {
        let adapter = PaginatedAdapter(Numbered);
        let mut ctx = Context::new();
        adapter.setup(&mut ctx);
        with_all_pages_count(&mut ctx, 10);
        with_paging_request::<u32>(&mut ctx, PagingRequest::AllPages);
        let isolation = crate::task::Task::<PageResult<u32, String>, String>::new(
            crate::task::TaskConfig::new(ctx.clone()),
            vec![],
        )
        .isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = adapter.run(isolation, ctx, cont).await.unwrap();
        match result {
            PageResult::AllPages { pages, .. } => assert_eq!(pages.len(), 3),
            _ => panic!("expected AllPages"),
        }
    }
}
