//! Benchmarks for lock acquisition latency

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use zk_coord::{
    DistributedLock, DistributedSemaphore, LockHandle, LockProvider, MemoryStore,
    SemaphoreProvider, ZkCoordProvider,
};

fn bench_lock_acquisition(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let provider = rt.block_on(async {
        ZkCoordProvider::builder()
            .connector(Arc::new(MemoryStore::new()))
            .cluster_id("bench")
            .build()
            .await
            .unwrap()
    });

    let lock = provider.create_lock("bench-lock");
    let semaphore = provider.create_semaphore("bench-semaphore", 8);

    let mut group = c.benchmark_group("memory_store");
    group.bench_function("try_acquire", |b| {
        b.to_async(&rt).iter(|| async {
            if let Ok(Some(handle)) = lock.try_acquire().await {
                let _ = handle.release().await;
            }
        });
    });

    group.bench_function("acquire_uncontended", |b| {
        b.to_async(&rt).iter(|| async {
            if let Ok(handle) = lock.acquire(Some(Duration::from_millis(10))).await {
                let _ = handle.release().await;
            }
        });
    });

    group.bench_function("semaphore_try_acquire", |b| {
        b.to_async(&rt).iter(|| async {
            if let Ok(Some(permit)) = semaphore.try_acquire().await {
                let _ = permit.release().await;
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lock_acquisition);
criterion_main!(benches);
