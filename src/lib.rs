//! `operon` — a client-side asynchronous operation runtime.
//!
//! A state-managed cache of in-flight and completed asynchronous
//! workflows (fetches, paginated fetches, mutations). Consumers describe
//! each workflow as an immutable [`Request`](request::Request); the
//! runtime schedules, deduplicates, retries, caches, observes, and
//! reports the outcome back to subscribers. It carries no network I/O,
//! persistence, or transport protocol of its own — purely an in-memory
//! async-coordination and state-management engine, the kind of thing a
//! UI data-binding layer sits on top of.
//!
//! # Module organization
//!
//! - [`duration`] / [`clock`] — a precise duration type and a pluggable
//!   clock (system, frozen, custom).
//! - [`path`] — [`path::OperationPath`], an ordered identifier sequence
//!   with prefix matching.
//! - [`context`] — [`context::Context`], the type-indexed, per-run
//!   configuration map.
//! - [`subscription`] — a one-shot, idempotent cancel token.
//! - [`task`] — cancellable units of execution with ordering
//!   dependencies.
//! - [`continuation`] — the sink a running request yields intermediate
//!   results through.
//! - [`delayer`] / [`backoff`] — a pluggable sleep primitive and backoff
//!   formulas.
//! - [`run_spec`] — predicates-with-change-notification driving
//!   automatic re-runs and staleness.
//! - [`request`] — the base `Request` trait and its three
//!   specializations: query, paginated, mutation.
//! - [`state`] — the per-specialization state machines backing a store.
//! - [`modifier`] — the wrapping pattern (retry, backoff, dedup,
//!   staleness, auto-rerun, event handlers) layered around a request.
//! - [`controller`] — an external driver that can push results or
//!   trigger refetches into a store.
//! - [`store`] — the per-operation runtime coordinating tasks, the state
//!   machine, and subscriber dispatch.
//! - [`client`] — a keyed pool of stores with prefix matching, bulk
//!   operations, and memory-pressure eviction.
//! - [`config`] — process-wide defaults ([`config::RuntimeConfig`]).
//! - [`error`] — the runtime's own error taxonomy, distinct from a
//!   request's typed failure.

pub mod backoff;
pub mod clock;
pub mod client;
pub mod config;
pub mod context;
pub mod continuation;
pub mod controller;
pub mod delayer;
pub mod duration;
pub mod error;
pub mod modifier;
pub mod path;
pub mod request;
pub mod run_spec;
pub mod state;
pub mod store;
pub mod subscription;
pub mod task;

pub use client::Client;
pub use config::RuntimeConfig;
pub use context::Context;
pub use continuation::Continuation;
pub use error::{MisuseWarning, OperationFailure, RuntimeError};
pub use path::OperationPath;
pub use request::Request;
pub use state::OperationStatus;
pub use subscription::Subscription;
pub use task::{Task, TaskConfig};
