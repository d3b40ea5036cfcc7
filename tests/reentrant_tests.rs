mod common;

use std::time::Duration;

use zk_coord::MemoryStore;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

#[tokio::test]
async fn hold_count_tracks_nesting() {
    let store = MemoryStore::new();
    let provider = common::provider(&store).await;
    let entity = common::entity_path("lock-exclusive", "nested");
    let lock = provider.create_reentrant_lock("nested");

    lock.lock(TIMEOUT).await.unwrap();
    assert_eq!(lock.hold_count().await, 1);
    assert_eq!(store.children_of(&entity).len(), 1);

    // Nested acquisition touches only the local count.
    lock.lock(TIMEOUT).await.unwrap();
    lock.lock(TIMEOUT).await.unwrap();
    assert_eq!(lock.hold_count().await, 3);
    assert_eq!(store.children_of(&entity).len(), 1);

    assert!(lock.unlock().await.unwrap());
    assert!(lock.unlock().await.unwrap());
    assert_eq!(lock.hold_count().await, 1);
    assert_eq!(store.children_of(&entity).len(), 1);

    // The real release happens only at count zero.
    assert!(lock.unlock().await.unwrap());
    assert_eq!(lock.hold_count().await, 0);
    assert!(store.children_of(&entity).is_empty());
}

#[tokio::test]
async fn unlock_without_hold_leaves_the_store_untouched() {
    let store = MemoryStore::new();
    let provider = common::provider(&store).await;
    let lock = provider.create_reentrant_lock("idle");

    assert!(!lock.unlock().await.unwrap());
    assert!(!store.node_exists(&common::entity_path("lock-exclusive", "idle")));
}

#[tokio::test]
async fn revocation_resets_the_hold_count() {
    let store = MemoryStore::new();
    let provider = common::provider(&store).await;
    let entity = common::entity_path("lock-exclusive", "reset");
    let lock = provider.create_reentrant_lock("reset");

    lock.lock(TIMEOUT).await.unwrap();
    lock.lock(TIMEOUT).await.unwrap();
    assert_eq!(lock.hold_count().await, 2);

    let node = format!("{entity}/{}", store.children_of(&entity)[0]);
    store.force_delete(&node);
    common::wait_until(Duration::from_secs(2), || store.children_of(&entity).is_empty())
        .await;
    common::wait_until_async(Duration::from_secs(2), || async {
        lock.is_revoked().await
    })
    .await;

    // The next lock() acquires fresh with a count of one.
    lock.lock(TIMEOUT).await.unwrap();
    assert_eq!(lock.hold_count().await, 1);
    assert!(!lock.is_revoked().await);
    assert_eq!(store.children_of(&entity).len(), 1);
}

#[tokio::test]
async fn destroy_releases_regardless_of_count() {
    let store = MemoryStore::new();
    let provider = common::provider(&store).await;
    let entity = common::entity_path("lock-exclusive", "destroyed");
    let lock = provider.create_reentrant_lock("destroyed");

    lock.lock(TIMEOUT).await.unwrap();
    lock.lock(TIMEOUT).await.unwrap();
    lock.destroy().await.unwrap();
    assert_eq!(lock.hold_count().await, 0);
    assert!(store.children_of(&entity).is_empty());
}
