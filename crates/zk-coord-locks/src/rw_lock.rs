//! Fair distributed reader-writer lock.
//!
//! Shared and exclusive reservations live under the same entity node so
//! they share one sequence space: readers wait only for earlier writers,
//! a writer waits for every earlier reservation of either kind.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_core::traits::DistributedReaderWriterLock;

use crate::handle::ZkLockHandle;
use crate::paths::{EntityPathBuilder, ReservationCategory};
use crate::reservation::{AcquireMode, ReservationManager, RevocationObserver};

pub struct ZkReaderWriterLock {
    name: String,
    owner_id: String,
    manager: Arc<ReservationManager>,
    paths: EntityPathBuilder,
    observer: Option<Arc<dyn RevocationObserver>>,
}

impl ZkReaderWriterLock {
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

    pub fn with_revocation_observer(mut self, observer: Arc<dyn RevocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn entity_path(&self) -> CoordResult<String> {
        self.paths
            .entity_path(ReservationCategory::LockShared, &self.name)
    }

    async fn acquire_mode(
        &self,
        mode: AcquireMode,
        timeout: Option<Duration>,
    ) -> CoordResult<ZkLockHandle> {
        let entity_path = self.entity_path()?;
        let reservation = self
            .manager
            .acquire(&entity_path, mode, &self.owner_id, timeout, self.observer.clone())
            .await?;
        Ok(ZkLockHandle::new(
            self.manager.clone(),
            entity_path,
            reservation,
        ))
    }
}

impl DistributedReaderWriterLock for ZkReaderWriterLock {
    type ReadHandle = ZkLockHandle;
    type WriteHandle = ZkLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, timeout), fields(lock = %self.name, mode = "read"))]
    async fn acquire_read(&self, timeout: Option<Duration>) -> CoordResult<Self::ReadHandle> {
        self.acquire_mode(AcquireMode::Shared, timeout).await
    }

    async fn try_acquire_read(&self) -> CoordResult<Option<Self::ReadHandle>> {
        match self.acquire_read(Some(Duration::ZERO)).await {
            Ok(handle) => Ok(Some(handle)),
            Err(CoordError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, timeout), fields(lock = %self.name, mode = "write"))]
    async fn acquire_write(&self, timeout: Option<Duration>) -> CoordResult<Self::WriteHandle> {
        self.acquire_mode(AcquireMode::Exclusive, timeout).await
    }

    async fn try_acquire_write(&self) -> CoordResult<Option<Self::WriteHandle>> {
        match self.acquire_write(Some(Duration::ZERO)).await {
            Ok(handle) => Ok(Some(handle)),
            Err(CoordError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
