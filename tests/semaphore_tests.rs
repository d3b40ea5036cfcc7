mod common;

use std::sync::Arc;
use std::time::Duration;

use zk_coord::{
    write_pool_size, DistributedSemaphore, LockHandle, MemoryStore, SemaphoreProvider,
};

#[tokio::test]
async fn pool_bound_is_enforced() {
    let store = MemoryStore::new();
    let provider = common::provider(&store).await;
    let semaphore = provider.create_semaphore("db-pool", 2);
    assert_eq!(semaphore.permit_pool_size(), 2);

    let first = semaphore.acquire(Some(Duration::from_secs(2))).await.unwrap();
    let second = semaphore.acquire(Some(Duration::from_secs(2))).await.unwrap();

    // The third holder must wait for a release.
    assert!(semaphore.try_acquire().await.unwrap().is_none());

    first.release().await.unwrap();
    let third = semaphore.acquire(Some(Duration::from_secs(2))).await.unwrap();

    third.release().await.unwrap();
    second.release().await.unwrap();
}

#[tokio::test]
async fn permits_release_in_reservation_order() {
    let store = MemoryStore::new();
    let provider = Arc::new(common::provider(&store).await);
    let entity = common::entity_path("semaphore", "workers");

    let semaphore = provider.create_semaphore("workers", 1);
    let held = semaphore.acquire(Some(Duration::from_secs(2))).await.unwrap();

    let waiter_sem = provider.create_semaphore("workers", 1);
    let waiter = tokio::spawn(async move { waiter_sem.acquire(None).await.unwrap() });
    common::wait_until(Duration::from_secs(2), || {
        store.children_of(&entity).len() == 2
    })
    .await;

    held.release().await.unwrap();
    let handle = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter admitted")
        .unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn raising_the_bound_admits_waiters_without_node_recreation() {
    let store = MemoryStore::new();
    let provider = Arc::new(common::provider(&store).await);
    let entity = common::entity_path("semaphore", "uploads");
    let config_path = "/apps/test/config/uploads-pool";

    let semaphore = provider
        .create_observed_semaphore("uploads", config_path, 1)
        .await
        .unwrap();
    assert_eq!(semaphore.permit_pool_size(), 1);

    let held = semaphore.acquire(Some(Duration::from_secs(2))).await.unwrap();

    let waiter_sem = provider
        .create_observed_semaphore("uploads", config_path, 1)
        .await
        .unwrap();
    let waiter = tokio::spawn(async move { waiter_sem.acquire(None).await.unwrap() });
    common::wait_until(Duration::from_secs(2), || {
        store.children_of(&entity).len() == 2
    })
    .await;
    let queued: Vec<String> = store.children_of(&entity);

    // Raise the bound; the queued reservation becomes eligible as-is.
    write_pool_size(provider.client(), config_path, 2)
        .await
        .unwrap();
    let admitted = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter admitted after raise")
        .unwrap();

    // Same nodes as before the raise: nothing was recreated.
    let mut after = store.children_of(&entity);
    let mut before = queued;
    before.sort();
    after.sort();
    assert_eq!(before, after);

    common::wait_until(Duration::from_secs(2), || {
        semaphore.permit_pool_size() == 2
    })
    .await;

    admitted.release().await.unwrap();
    held.release().await.unwrap();
}
