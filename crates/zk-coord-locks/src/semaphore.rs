//! Fair distributed counting semaphore with a live permit pool bound.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_core::traits::DistributedSemaphore;

use crate::handle::ZkLockHandle;
use crate::paths::{EntityPathBuilder, ReservationCategory};
use crate::permit::PermitPoolSize;
use crate::reservation::{AcquireMode, ReservationManager, RevocationObserver};

pub struct ZkSemaphore {
    name: String,
    owner_id: String,
    manager: Arc<ReservationManager>,
    paths: EntityPathBuilder,
    pool: Arc<dyn PermitPoolSize>,
    observer: Option<Arc<dyn RevocationObserver>>,
}

impl ZkSemaphore {
    pub(crate) fn new(
        name: &str,
        manager: Arc<ReservationManager>,
        paths: EntityPathBuilder,
        pool: Arc<dyn PermitPoolSize>,
    ) -> Self {
        Self {
            name: name.to_string(),
            owner_id: Uuid::new_v4().to_string(),
            manager,
            paths,
            pool,
            observer: None,
        }
    }

    pub fn with_revocation_observer(mut self, observer: Arc<dyn RevocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn entity_path(&self) -> CoordResult<String> {
        self.paths
            .entity_path(ReservationCategory::Semaphore, &self.name)
    }
}

impl DistributedSemaphore for ZkSemaphore {
    type Handle = ZkLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn permit_pool_size(&self) -> u32 {
        self.pool.permits()
    }

    #[instrument(skip(self, timeout), fields(semaphore = %self.name))]
    async fn acquire(&self, timeout: Option<Duration>) -> CoordResult<Self::Handle> {
        let entity_path = self.entity_path()?;
        let reservation = self
            .manager
            .acquire(
                &entity_path,
                AcquireMode::Semaphore(self.pool.clone()),
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
