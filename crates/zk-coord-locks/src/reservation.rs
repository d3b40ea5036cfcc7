//! The sequential-ephemeral reservation protocol.
//!
//! One acquire attempt creates one sequential ephemeral child of the
//! entity path; the store-assigned sequence suffix is the fairness basis.
//! Waiters watch their nearest blocking predecessor and re-evaluate
//! eligibility when it disappears. A held node deleted by anything other
//! than its own release is a revocation, reported through the handle's
//! watch channel and the optional [`RevocationObserver`], never as an
//! error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, instrument, warn, Span};
use zk_coord_client::{PathObserver, ResilientClient};
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_core::timeout::Deadline;
use zk_coord_store::paths;
use zk_coord_store::types::{CreateMode, EventKind, WatchedEvent};

use crate::paths::{reservation_node_name, sequence_of, ReservationType};
use crate::permit::PermitPoolSize;

/// Notified when a held reservation is lost involuntarily.
pub trait RevocationObserver: Send + Sync {
    /// Called with the revoked reservation's node path.
    fn on_revoked(&self, reservation_path: &str);
}

/// How an acquire attempt claims its entity.
#[derive(Clone)]
pub enum AcquireMode {
    Exclusive,
    Shared,
    Semaphore(Arc<dyn PermitPoolSize>),
}

impl AcquireMode {
    fn reservation_type(&self) -> ReservationType {
        match self {
            AcquireMode::Exclusive => ReservationType::Exclusive,
            AcquireMode::Shared => ReservationType::Shared,
            AcquireMode::Semaphore(_) => ReservationType::Semaphore,
        }
    }
}

/// An acquired reservation: the node path is the lock identifier, the
/// receiver flips to `true` on revocation.
pub struct Reservation {
    pub node_path: String,
    pub revoked_rx: watch::Receiver<bool>,
}

struct HeldEntry {
    revoked_tx: watch::Sender<bool>,
    observer: Option<Arc<dyn RevocationObserver>>,
}

/// Per-entity waiter wakeup and held-reservation index.
///
/// The index exists purely for revocation dispatch; the store remains the
/// sole source of truth for who holds what.
struct EntityState {
    path: String,
    notify: Notify,
    held: Mutex<HashMap<String, HeldEntry>>,
}

impl EntityState {
    fn register_held(
        &self,
        node_path: &str,
        observer: Option<Arc<dyn RevocationObserver>>,
    ) -> watch::Receiver<bool> {
        let (revoked_tx, revoked_rx) = watch::channel(false);
        self.lock_held().insert(
            node_path.to_string(),
            HeldEntry {
                revoked_tx,
                observer,
            },
        );
        revoked_rx
    }

    /// Drops the index entry without signaling (the self-release path).
    fn forget(&self, node_path: &str) -> bool {
        self.lock_held().remove(node_path).is_some()
    }

    fn revoke_if_held(&self, node_path: &str) {
        if let Some(entry) = self.lock_held().remove(node_path) {
            warn!(node = %node_path, "held reservation revoked");
            let _ = entry.revoked_tx.send(true);
            if let Some(observer) = entry.observer {
                observer.on_revoked(node_path);
            }
        }
    }

    fn revoke_all(&self) {
        let drained: Vec<_> = self.lock_held().drain().collect();
        for (node_path, entry) in drained {
            warn!(node = %node_path, "held reservation revoked");
            let _ = entry.revoked_tx.send(true);
            if let Some(observer) = entry.observer {
                observer.on_revoked(&node_path);
            }
        }
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, HashMap<String, HeldEntry>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Routes entity watch events into revocation checks and waiter wakeups.
struct EntityObserver {
    state: Weak<EntityState>,
}

impl PathObserver for EntityObserver {
    fn on_event(&self, event: &WatchedEvent) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if event.kind == EventKind::NodeDeleted && event.path != state.path {
            state.revoke_if_held(&event.path);
        }
        state.notify.notify_waiters();
    }

    fn on_state_unknown(&self) {
        if let Some(state) = self.state.upgrade() {
            warn!(entity = %state.path, "entity state unknown; revoking local holds");
            state.revoke_all();
            state.notify.notify_waiters();
        }
    }
}

/// Owns a reservation node that has not reached acquisition yet.
///
/// If the acquire future is dropped mid-wait the guard's `Drop` deletes
/// the node, so a cancelled attempt cannot leave a phantom waiter in the
/// fair queue. Every ordinary exit path disarms the guard with [`take`].
///
/// [`take`]: PendingNode::take
struct PendingNode {
    client: Arc<ResilientClient>,
    node_path: String,
    armed: bool,
}

impl PendingNode {
    fn new(client: Arc<ResilientClient>, node_path: String) -> Self {
        Self {
            client,
            node_path,
            armed: true,
        }
    }

    fn path(&self) -> &str {
        &self.node_path
    }

    /// Hands the node path back to the caller and disarms the guard.
    fn take(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.node_path)
    }
}

impl Drop for PendingNode {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let node_path = std::mem::take(&mut self.node_path);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = client.delete(&node_path, -1).await {
                        warn!(
                            node = %node_path, error = %e,
                            "failed to delete reservation of a cancelled acquire"
                        );
                    }
                });
            }
            Err(_) => warn!(
                node = %node_path,
                "acquire dropped outside a runtime; reservation released only by session end"
            ),
        }
    }
}

enum Eligibility {
    Eligible,
    /// Blocked; watch the named predecessor when there is one to watch
    /// (a zero permit pool has none and parks on pool changes alone).
    Blocked { watch_node: Option<String> },
}

struct EntityEntry {
    state: Arc<EntityState>,
    /// Kept for identity-based unregistration when the entry is evicted.
    observer: Arc<dyn PathObserver>,
}

impl EntityEntry {
    /// Nothing held and no acquire in flight (the map owns the sole
    /// strong reference).
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.state) == 1 && self.state.lock_held().is_empty()
    }
}

/// Implements fair acquisition for exclusive locks, shared locks, and
/// counting semaphores over one [`ResilientClient`].
pub struct ReservationManager {
    client: Arc<ResilientClient>,
    entities: Mutex<HashMap<String, EntityEntry>>,
}

impl ReservationManager {
    pub fn new(client: Arc<ResilientClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            entities: Mutex::new(HashMap::new()),
        })
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    /// Acquires a reservation under `entity_path`, waiting up to `timeout`
    /// (`None` = indefinitely, `Some(ZERO)` = try once).
    #[instrument(
        skip(self, mode, observer),
        fields(entity = %entity_path, owner = %owner, acquired = false)
    )]
    pub async fn acquire(
        &self,
        entity_path: &str,
        mode: AcquireMode,
        owner: &str,
        timeout: Option<Duration>,
        observer: Option<Arc<dyn RevocationObserver>>,
    ) -> CoordResult<Reservation> {
        let deadline = Deadline::after(timeout);
        let state = self.entity_state(entity_path);
        self.ensure_entity(entity_path).await?;

        let created = self
            .client
            .create(
                &paths::join(entity_path, &reservation_node_name(mode.reservation_type(), owner)),
                &[],
                CreateMode::EphemeralSequential,
            )
            .await?;
        let pending = PendingNode::new(self.client.clone(), created);
        let my_seq = sequence_of(paths::node_name(pending.path())).ok_or_else(|| {
            CoordError::Config(format!(
                "store returned unsequenced node {:?}",
                pending.path()
            ))
        })?;
        debug!(node = %pending.path(), "reservation node created");

        let mut pool_rx = match &mode {
            AcquireMode::Semaphore(pool) => Some(pool.subscribe()),
            _ => None,
        };

        loop {
            // Arm the wakeup before listing so a deletion between the
            // listing and the wait cannot be missed.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(rx) = pool_rx.as_mut() {
                rx.borrow_and_update();
            }

            let children = match self.client.get_children(entity_path, false).await {
                Ok(children) => children,
                Err(e) => {
                    self.abandon(&pending.take()).await;
                    return Err(e);
                }
            };
            let Some(verdict) = evaluate(&children, my_seq, &mode) else {
                // Our ephemeral vanished before acquisition completed.
                let node_path = pending.take();
                return Err(CoordError::Session(format!(
                    "reservation node {node_path} lost before acquisition"
                )));
            };

            let watch_node = match verdict {
                Eligibility::Eligible => {
                    let revoked_rx = state.register_held(pending.path(), observer);
                    match self.client.exists(pending.path(), true).await {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            state.forget(pending.path());
                            let node_path = pending.take();
                            return Err(CoordError::Session(format!(
                                "reservation node {node_path} lost before acquisition"
                            )));
                        }
                        Err(e) => {
                            state.forget(pending.path());
                            self.abandon(&pending.take()).await;
                            return Err(e);
                        }
                    }
                    Span::current().record("acquired", true);
                    let node_path = pending.take();
                    debug!(node = %node_path, "reservation acquired");
                    return Ok(Reservation {
                        node_path,
                        revoked_rx,
                    });
                }
                Eligibility::Blocked { watch_node } => watch_node,
            };

            if let Some(blocker) = watch_node {
                let blocker_path = paths::join(entity_path, &blocker);
                match self.client.exists(&blocker_path, true).await {
                    // Blocker vanished between listing and watching.
                    Ok(None) => continue,
                    Ok(Some(_)) => {}
                    Err(e) => {
                        self.abandon(&pending.take()).await;
                        return Err(e);
                    }
                }
            }

            let wait = async {
                match pool_rx.as_mut() {
                    Some(rx) => {
                        tokio::select! {
                            _ = notified.as_mut() => {}
                            _ = rx.changed() => {}
                        }
                    }
                    None => notified.as_mut().await,
                }
            };
            match deadline.remaining() {
                None => wait.await,
                Some(remaining) => {
                    let _ = tokio::time::timeout(remaining, wait).await;
                    if deadline.expired() {
                        self.abandon(&pending.take()).await;
                        return Err(CoordError::Timeout(deadline.timeout()));
                    }
                }
            }
        }
    }

    /// Releases a held reservation. The index entry is dropped first so
    /// the resulting deletion event is not mistaken for a revocation.
    pub async fn release(&self, entity_path: &str, node_path: &str) -> CoordResult<()> {
        if let Some(state) = self.lock_entities().get(entity_path).map(|e| e.state.clone()) {
            state.forget(node_path);
        }
        self.client.delete(node_path, -1).await?;
        self.evict_if_idle(entity_path);
        debug!(node = %node_path, "reservation released");
        Ok(())
    }

    /// Drops an entity's bookkeeping (and its watch-event registration)
    /// once nothing is held and no acquire is in flight.
    fn evict_if_idle(&self, entity_path: &str) {
        let mut entities = self.lock_entities();
        if entities.get(entity_path).is_some_and(EntityEntry::is_idle) {
            if let Some(entry) = entities.remove(entity_path) {
                self.client.observers().unregister(entity_path, &entry.observer);
            }
        }
    }

    /// Deletes an un-acquired reservation node; a pending node must never
    /// outlive its acquire attempt.
    async fn abandon(&self, node_path: &str) {
        if let Err(e) = self.client.delete(node_path, -1).await {
            warn!(node = %node_path, error = %e, "failed to delete abandoned reservation node");
        }
    }

    /// Creates the entity path and its ancestors if missing.
    async fn ensure_entity(&self, entity_path: &str) -> CoordResult<()> {
        if self.client.exists_cached(entity_path).await?.is_some() {
            return Ok(());
        }
        let mut path = String::with_capacity(entity_path.len());
        for segment in entity_path.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            match self.client.create(&path, &[], CreateMode::Persistent).await {
                Ok(_) => {}
                Err(e) if e.is_node_exists() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn entity_state(&self, entity_path: &str) -> Arc<EntityState> {
        let mut entities = self.lock_entities();
        // Sweep entries orphaned by failed or cancelled acquires.
        entities.retain(|path, entry| {
            let keep = !entry.is_idle();
            if !keep {
                self.client.observers().unregister(path, &entry.observer);
            }
            keep
        });
        if let Some(entry) = entities.get(entity_path) {
            return entry.state.clone();
        }
        let state = Arc::new(EntityState {
            path: entity_path.to_string(),
            notify: Notify::new(),
            held: Mutex::new(HashMap::new()),
        });
        let observer: Arc<dyn PathObserver> = Arc::new(EntityObserver {
            state: Arc::downgrade(&state),
        });
        self.client.observers().register(entity_path, observer.clone());
        entities.insert(
            entity_path.to_string(),
            EntityEntry {
                state: state.clone(),
                observer,
            },
        );
        state
    }

    #[cfg(test)]
    fn entity_count(&self) -> usize {
        self.lock_entities().len()
    }

    fn lock_entities(&self) -> std::sync::MutexGuard<'_, HashMap<String, EntityEntry>> {
        self.entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Evaluates eligibility for `my_seq` against the entity's sorted
/// children. `None` means our own node is no longer present.
fn evaluate(children: &[String], my_seq: u64, mode: &AcquireMode) -> Option<Eligibility> {
    let mut entries: Vec<(u64, ReservationType, &str)> = children
        .iter()
        .filter_map(|name| {
            Some((
                sequence_of(name)?,
                ReservationType::of_node_name(name)?,
                name.as_str(),
            ))
        })
        .collect();
    entries.sort_unstable_by_key(|(seq, ..)| *seq);
    entries.iter().find(|(seq, ..)| *seq == my_seq)?;

    match mode {
        // An exclusive claim waits for every earlier reservation of
        // either lock type; its blocker is the nearest of them.
        AcquireMode::Exclusive => {
            let blocker = entries
                .iter()
                .filter(|(seq, rtype, _)| {
                    *seq < my_seq
                        && matches!(rtype, ReservationType::Exclusive | ReservationType::Shared)
                })
                .next_back();
            Some(match blocker {
                None => Eligibility::Eligible,
                Some((_, _, name)) => Eligibility::Blocked {
                    watch_node: Some(name.to_string()),
                },
            })
        }
        // A shared claim waits only for earlier exclusive reservations.
        AcquireMode::Shared => {
            let blocker = entries
                .iter()
                .filter(|(seq, rtype, _)| {
                    *seq < my_seq && *rtype == ReservationType::Exclusive
                })
                .next_back();
            Some(match blocker {
                None => Eligibility::Eligible,
                Some((_, _, name)) => Eligibility::Blocked {
                    watch_node: Some(name.to_string()),
                },
            })
        }
        // A permit claim is eligible while its rank is under the bound;
        // otherwise it watches the node at the rank boundary.
        AcquireMode::Semaphore(pool) => {
            let members: Vec<&str> = entries
                .iter()
                .filter(|(_, rtype, _)| *rtype == ReservationType::Semaphore)
                .map(|(_, _, name)| *name)
                .collect();
            let rank = members
                .iter()
                .position(|name| sequence_of(name) == Some(my_seq))?;
            let permits = pool.permits() as usize;
            Some(if rank < permits {
                Eligibility::Eligible
            } else {
                Eligibility::Blocked {
                    watch_node: if permits == 0 {
                        None
                    } else {
                        Some(members[rank - permits].to_string())
                    },
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::reservation_node_name;
    use crate::permit::FixedPermitPoolSize;

    fn node(rtype: ReservationType, owner: &str, seq: u64) -> String {
        format!("{}{seq:010}", reservation_node_name(rtype, owner))
    }

    fn eligible(e: Option<Eligibility>) -> bool {
        matches!(e, Some(Eligibility::Eligible))
    }

    fn blocker_of(e: Option<Eligibility>) -> Option<String> {
        match e {
            Some(Eligibility::Blocked { watch_node }) => watch_node,
            _ => None,
        }
    }

    #[test]
    fn exclusive_waits_for_nearest_predecessor() {
        let children = vec![
            node(ReservationType::Exclusive, "a", 1),
            node(ReservationType::Exclusive, "b", 2),
            node(ReservationType::Exclusive, "c", 3),
        ];
        assert!(eligible(evaluate(&children, 1, &AcquireMode::Exclusive)));
        assert_eq!(
            blocker_of(evaluate(&children, 3, &AcquireMode::Exclusive)),
            Some(node(ReservationType::Exclusive, "b", 2))
        );
    }

    #[test]
    fn shared_claims_overlap_but_wait_for_writers() {
        let children = vec![
            node(ReservationType::Shared, "r1", 1),
            node(ReservationType::Shared, "r2", 2),
            node(ReservationType::Exclusive, "w", 3),
            node(ReservationType::Shared, "r3", 4),
        ];
        // Both early readers proceed together.
        assert!(eligible(evaluate(&children, 1, &AcquireMode::Shared)));
        assert!(eligible(evaluate(&children, 2, &AcquireMode::Shared)));
        // The writer waits for the later of the two readers.
        assert_eq!(
            blocker_of(evaluate(&children, 3, &AcquireMode::Exclusive)),
            Some(node(ReservationType::Shared, "r2", 2))
        );
        // The late reader waits for the writer.
        assert_eq!(
            blocker_of(evaluate(&children, 4, &AcquireMode::Shared)),
            Some(node(ReservationType::Exclusive, "w", 3))
        );
    }

    #[test]
    fn semaphore_rank_respects_pool_bound() {
        let pool: Arc<dyn PermitPoolSize> = Arc::new(FixedPermitPoolSize::new(2));
        let mode = AcquireMode::Semaphore(pool);
        let children = vec![
            node(ReservationType::Semaphore, "a", 1),
            node(ReservationType::Semaphore, "b", 2),
            node(ReservationType::Semaphore, "c", 3),
        ];
        assert!(eligible(evaluate(&children, 1, &mode)));
        assert!(eligible(evaluate(&children, 2, &mode)));
        // Rank 2 with 2 permits watches the node at the rank boundary.
        assert_eq!(
            blocker_of(evaluate(&children, 3, &mode)),
            Some(node(ReservationType::Semaphore, "a", 1))
        );
    }

    #[test]
    fn zero_permit_pool_parks_without_a_blocker() {
        let pool: Arc<dyn PermitPoolSize> = Arc::new(FixedPermitPoolSize::new(0));
        let mode = AcquireMode::Semaphore(pool);
        let children = vec![node(ReservationType::Semaphore, "a", 1)];
        assert!(matches!(
            evaluate(&children, 1, &mode),
            Some(Eligibility::Blocked { watch_node: None })
        ));
    }

    #[test]
    fn missing_own_node_is_detected() {
        let children = vec![node(ReservationType::Exclusive, "a", 1)];
        assert!(evaluate(&children, 9, &AcquireMode::Exclusive).is_none());
    }

    #[test]
    fn foreign_children_are_ignored() {
        let children = vec![
            "config".to_string(),
            node(ReservationType::Exclusive, "a", 5),
        ];
        assert!(eligible(evaluate(&children, 5, &AcquireMode::Exclusive)));
    }

    async fn manager_for(store: &zk_coord_store::MemoryStore) -> Arc<ReservationManager> {
        let client = Arc::new(
            zk_coord_client::ResilientClient::connect(
                Arc::new(store.clone()),
                zk_coord_client::ClientConfig::default(),
                Arc::new(zk_coord_client::NullPathCache::new()),
                Arc::new(zk_coord_client::ObserverManager::new()),
            )
            .await
            .unwrap(),
        );
        ReservationManager::new(client)
    }

    #[tokio::test]
    async fn entity_bookkeeping_is_dropped_once_idle() {
        let store = zk_coord_store::MemoryStore::new();
        let manager = manager_for(&store).await;
        let entity = "/apps/t/coord/c/lock-exclusive/idle";

        let first = manager
            .acquire(
                entity,
                AcquireMode::Exclusive,
                "owner-a",
                Some(Duration::from_secs(2)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(manager.entity_count(), 1);
        assert!(manager.client().observers().is_observed(entity));

        // Still held: the entry and its registration must survive.
        manager.evict_if_idle(entity);
        assert_eq!(manager.entity_count(), 1);

        manager.release(entity, &first.node_path).await.unwrap();
        assert_eq!(manager.entity_count(), 0);
        assert!(!manager.client().observers().is_observed(entity));

        // A later acquire rebuilds the bookkeeping from scratch.
        let second = manager
            .acquire(
                entity,
                AcquireMode::Exclusive,
                "owner-b",
                Some(Duration::from_secs(2)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(manager.entity_count(), 1);
        manager.release(entity, &second.node_path).await.unwrap();
        assert_eq!(manager.entity_count(), 0);
    }
}
