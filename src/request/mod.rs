//! `Request` — the immutable operation description a store drives.
//!
//! Every specialization (query, paginated, mutation) implements this base
//! trait directly; the specialization traits below only add the
//! additional associated types and hooks needed to assemble their
//! specific `run` bodies (`spec.md` §4.1).

pub mod mutation;
pub mod paginated;
pub mod query;

use crate::context::Context;
use crate::continuation::Continuation;
use crate::task::Isolation;
use async_trait::async_trait;

/// The base operation contract. `setup` runs exactly once per store, at
/// construction; `run` executes on every scheduled task.
#[async_trait]
pub trait Request: Send + Sync + 'static {
    /// The success type.
    type Value: Clone + Send + Sync + 'static;
    /// The failure type.
    type Failure: Clone + Send + Sync + 'static;

    /// Idempotent per-store context preparation. The default is a no-op.
    fn setup(&self, _context: &mut Context) {}

    /// Run the operation body. May suspend at any await point (a
    /// cancellation opportunity, per `spec.md` §5) and may call
    /// `continuation.yield_*` any number of times before returning.
    async fn run(
        &self,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure>;
}
