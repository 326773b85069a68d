//! End-to-end exercises of `operon::Client` as an external consumer
//! would use it: no access to crate-private items, just the public API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use operon::context::Context;
use operon::continuation::Continuation;
use operon::path::OperationPath;
use operon::request::query::QueryRequest;
use operon::request::Request;
use operon::task::Isolation;
use operon::{Client, RuntimeConfig};

struct Counter {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Request for Counter {
    type Value = u32;
    type Failure = String;

    async fn run(
        &self,
        _isolation: Isolation,
        _context: Context,
        _continuation: Continuation<u32, String>,
    ) -> Result<u32, String> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl QueryRequest for Counter {}

fn segment(name: &'static str) -> OperationPath {
    OperationPath::from_elements([name.into()])
}

#[tokio::test]
async fn fetch_and_reread_through_default_policy() {
    let client = Client::new(RuntimeConfig::for_tests());
    let calls = Arc::new(AtomicU32::new(0));
    let store = client.query_store(
        segment("counter"),
        Counter {
            calls: calls.clone(),
        },
        None,
    );

    assert_eq!(store.fetch().await, Ok(1));
    assert_eq!(store.current_value(), Some(1));

    // A second lookup at the same path is the identical store, not a
    // fresh one, so its cached value survives.
    let same = client.query_store(
        segment("counter"),
        Counter {
            calls: calls.clone(),
        },
        None,
    );
    assert_eq!(same.current_value(), Some(1));
}

#[tokio::test]
async fn s4_hierarchical_paths_scope_bulk_operations() {
    let client = Client::new(RuntimeConfig::for_tests());
    let friends_root = OperationPath::from_elements(["users".into()]);

    for id in 1i64..=3 {
        client.query_store(
            OperationPath::from_elements(["users".into(), id.into()]),
            Counter {
                calls: Arc::new(AtomicU32::new(0)),
            },
            None,
        );
    }
    client.query_store(
        segment("unrelated"),
        Counter {
            calls: Arc::new(AtomicU32::new(0)),
        },
        None,
    );

    assert_eq!(client.stores_matching(&friends_root).len(), 3);
    assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 4);

    client.clear_stores_matching(&friends_root);
    assert_eq!(client.stores_matching(&friends_root).len(), 0);
    assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 1);
}

#[tokio::test]
async fn memory_pressure_evicts_every_cached_store() {
    let client = Client::new(RuntimeConfig::for_tests());
    client.query_store(
        segment("a"),
        Counter {
            calls: Arc::new(AtomicU32::new(0)),
        },
        None,
    );
    client.query_store(
        segment("b"),
        Counter {
            calls: Arc::new(AtomicU32::new(0)),
        },
        None,
    );
    assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 2);

    client.handle_memory_pressure();
    assert_eq!(client.stores_matching(&OperationPath::empty()).len(), 0);
}
