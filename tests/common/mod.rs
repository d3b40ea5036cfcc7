//! Shared harness for the integration tests: one in-process store, one
//! provider wired to it with fast retry timings.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use zk_coord::{BackoffPolicy, MemoryStore, ZkCoordProvider};

pub const BASE: &str = "/apps";
pub const CONTEXT: &str = "test";
pub const CLUSTER: &str = "cluster-1";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub async fn provider(store: &MemoryStore) -> ZkCoordProvider {
    init_tracing();
    ZkCoordProvider::builder()
        .connector(Arc::new(store.clone()))
        .base_path(BASE)
        .path_context(CONTEXT)
        .cluster_id(CLUSTER)
        .backoff(BackoffPolicy::Constant {
            initial: Duration::from_millis(10),
            delta: Duration::from_millis(10),
            max: Duration::from_millis(100),
            looping: true,
        })
        .assume_error_timeout(Duration::from_millis(500))
        .build()
        .await
        .expect("provider connects")
}

/// The entity path the provider builds for a category/name pair.
pub fn entity_path(category: &str, name: &str) -> String {
    format!("{BASE}/{CONTEXT}/coord/{CLUSTER}/{category}/{name}")
}

/// Polls until `predicate` holds or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(deadline: Duration, predicate: F) {
    let start = std::time::Instant::now();
    while !predicate() {
        assert!(
            start.elapsed() < deadline,
            "condition not reached within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Polls an async predicate until it holds or the deadline passes.
pub async fn wait_until_async<F, Fut>(deadline: Duration, predicate: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while !predicate().await {
        assert!(
            start.elapsed() < deadline,
            "condition not reached within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
