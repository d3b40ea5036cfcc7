//! Five tasks sharing two permits, then a live raise of the pool bound.
//!
//! Run with: cargo run --example memory_semaphore

use std::sync::Arc;
use std::time::Duration;

use zk_coord::{write_pool_size, DistributedSemaphore, LockHandle, MemoryStore, ZkCoordProvider};

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

    let config_path = "/apps/default/config/demo-pool";
    let mut tasks = Vec::new();
    for worker in 0..5 {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move {
            let semaphore = provider
                .create_observed_semaphore("demo-pool", config_path, 2)
                .await
                .unwrap();
            let permit = semaphore.acquire(Some(Duration::from_secs(10))).await.unwrap();
            println!(
                "worker {worker} got a permit (pool size {})",
                semaphore.permit_pool_size()
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
            permit.release().await.unwrap();
        }));
    }

    // Let the first holders settle, then widen the pool for the waiters.
    tokio::time::sleep(Duration::from_millis(100)).await;
    write_pool_size(provider.client(), config_path, 4).await?;
    println!("pool raised to 4");

    for task in tasks {
        task.await?;
    }
    provider.shutdown().await;
    Ok(())
}
