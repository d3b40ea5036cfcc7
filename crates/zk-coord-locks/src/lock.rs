//! Fair distributed mutual-exclusion lock.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_core::traits::DistributedLock;

use crate::handle::ZkLockHandle;
use crate::paths::{EntityPathBuilder, ReservationCategory};
use crate::reservation::{AcquireMode, ReservationManager, RevocationObserver};

/// A distributed lock backed by sequential ephemeral reservation nodes.
///
/// Fair: holders acquire in store-assigned sequence order.
pub struct ZkDistributedLock {
    name: String,
    owner_id: String,
    manager: Arc<ReservationManager>,
    paths: EntityPathBuilder,
    observer: Option<Arc<dyn RevocationObserver>>,
}

impl ZkDistributedLock {
    pub(crate) fn new(
        name: &str,
        manager: Arc<ReservationManager>,
        paths: EntityPathBuilder,
    ) -> Self {
        Self {
            name: name.to_string(),
            owner_id: Uuid::new_v4().to_string(),
            manager,
            paths,
            observer: None,
        }
    }

    /// Registers a callback invoked when a held reservation is revoked.
    pub fn with_revocation_observer(mut self, observer: Arc<dyn RevocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn entity_path(&self) -> CoordResult<String> {
        self.paths
            .entity_path(ReservationCategory::LockExclusive, &self.name)
    }
}

impl DistributedLock for ZkDistributedLock {
    type Handle = ZkLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, timeout), fields(lock = %self.name))]
    async fn acquire(&self, timeout: Option<Duration>) -> CoordResult<Self::Handle> {
        let entity_path = self.entity_path()?;
        let reservation = self
            .manager
            .acquire(
                &entity_path,
                AcquireMode::Exclusive,
                &self.owner_id,
                timeout,
                self.observer.clone(),
            )
            .await?;
        Ok(ZkLockHandle::new(
            self.manager.clone(),
            entity_path,
            reservation,
        ))
    }

    async fn try_acquire(&self) -> CoordResult<Option<Self::Handle>> {
        match self.acquire(Some(Duration::ZERO)).await {
            Ok(handle) => Ok(Some(handle)),
            Err(CoordError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
