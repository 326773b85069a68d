//! `QueryRequest` — the one-shot fetch specialization. `run` *is* the
//! body; there's nothing to add over the base [`crate::request::Request`]
//! trait (`spec.md` §4.1: "Query: run is the body directly").

use crate::request::Request;

/// Marker trait identifying a [`Request`] as query-shaped, so
/// [`crate::client::Client::query_store`] can accept it while rejecting
/// requests meant for a different store kind (e.g.
/// [`crate::request::mutation::MutationAdapter`],
/// [`crate::request::paginated::PaginatedAdapter`]) at compile time
/// rather than panicking inside them at the first `run`. Implement this
/// explicitly on a query-shaped [`Request`] — it is not derived
/// automatically.
pub trait QueryRequest: Request {}
