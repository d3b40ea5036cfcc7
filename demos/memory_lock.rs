//! Two tasks contending for one exclusive lock over the in-process store.
//!
//! Run with: cargo run --example memory_lock

use std::sync::Arc;
use std::time::Duration;

use zk_coord::{DistributedLock, LockHandle, LockProvider, MemoryStore, ZkCoordProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let provider = Arc::new(
        ZkCoordProvider::builder()
            .connector(Arc::new(MemoryStore::new()))
            .cluster_id("demo")
            .build()
            .await?,
    );

    let mut workers = Vec::new();
    for worker in 0..2 {
        let provider = provider.clone();
        workers.push(tokio::spawn(async move {
            let lock = provider.create_lock("shared-resource");
            for round in 0..3 {
                let handle = lock.acquire(Some(Duration::from_secs(5))).await.unwrap();
                println!("worker {worker} holds the lock (round {round})");
                tokio::time::sleep(Duration::from_millis(50)).await;
                handle.release().await.unwrap();
            }
        }));
    }
    for worker in workers {
        worker.await?;
    }

    provider.shutdown().await;
    Ok(())
}
