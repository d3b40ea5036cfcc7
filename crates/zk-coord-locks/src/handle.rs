//! The handle type backing every acquired lock, shared lock, and permit.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;
use zk_coord_core::error::CoordResult;
use zk_coord_core::traits::LockHandle;

use crate::reservation::{Reservation, ReservationManager};

/// A held reservation.
///
/// Release is explicit; dropping the handle only schedules a best-effort
/// release on the current runtime. `lost_token()` flips to `true` when the
/// backing node disappears without this handle's own release.
pub struct ZkLockHandle {
    manager: Arc<ReservationManager>,
    entity_path: String,
    node_path: Option<String>,
    revoked_rx: watch::Receiver<bool>,
}

impl ZkLockHandle {
    pub(crate) fn new(
        manager: Arc<ReservationManager>,
        entity_path: String,
        reservation: Reservation,
    ) -> Self {
        Self {
            manager,
            entity_path,
            node_path: Some(reservation.node_path),
            revoked_rx: reservation.revoked_rx,
        }
    }

    /// The reservation node path identifying this hold.
    pub fn reservation_path(&self) -> Option<&str> {
        self.node_path.as_deref()
    }
}

impl LockHandle for ZkLockHandle {
    fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.revoked_rx
    }

    async fn release(mut self) -> CoordResult<()> {
        if let Some(node_path) = self.node_path.take() {
            self.manager.release(&self.entity_path, &node_path).await?;
        }
        Ok(())
    }
}

impl Drop for ZkLockHandle {
    fn drop(&mut self) {
        let Some(node_path) = self.node_path.take() else {
            return;
        };
        let manager = self.manager.clone();
        let entity_path = std::mem::take(&mut self.entity_path);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = manager.release(&entity_path, &node_path).await {
                        warn!(node = %node_path, error = %e, "best-effort release on drop failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    node = %node_path,
                    "handle dropped outside a runtime; reservation released only by session end"
                );
            }
        }
    }
}
