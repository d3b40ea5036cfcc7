//! Reentrant wrapper layering a hold count over one real reservation.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use zk_coord_core::error::CoordResult;
use zk_coord_core::traits::{DistributedLock, LockHandle};

use crate::handle::ZkLockHandle;
use crate::lock::ZkDistributedLock;

struct Held {
    handle: ZkLockHandle,
    count: u32,
}

/// A same-owner reentrant lock.
///
/// The first `lock()` performs the real acquire; nested calls only bump
/// the hold count. `unlock()` decrements, releasing the store node at
/// count zero. Revocation of the underlying reservation resets the count:
/// the next `lock()` acquires fresh.
pub struct ReentrantZkLock {
    lock: ZkDistributedLock,
    held: Mutex<Option<Held>>,
}

impl ReentrantZkLock {
    pub(crate) fn new(lock: ZkDistributedLock) -> Self {
        Self {
            lock,
            held: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    /// Acquires the lock or increments the hold count.
    pub async fn lock(&self, timeout: Option<Duration>) -> CoordResult<()> {
        let mut held = self.held.lock().await;
        let live = held.as_ref().is_some_and(|h| !h.handle.is_revoked());
        if live {
            if let Some(entry) = held.as_mut() {
                entry.count += 1;
            }
            return Ok(());
        }
        if held.take().is_some() {
            debug!(lock = %self.lock.name(), "held reservation revoked; re-acquiring");
        }
        let handle = self.lock.acquire(timeout).await?;
        *held = Some(Held { handle, count: 1 });
        Ok(())
    }

    /// Decrements the hold count, releasing the reservation at zero.
    ///
    /// Returns `false` when nothing was held; the store is untouched.
    pub async fn unlock(&self) -> CoordResult<bool> {
        let mut held = self.held.lock().await;
        let count = match held.as_ref() {
            None => return Ok(false),
            Some(entry) => entry.count,
        };
        if count > 1 {
            if let Some(entry) = held.as_mut() {
                entry.count -= 1;
            }
            return Ok(true);
        }
        if let Some(entry) = held.take() {
            entry.handle.release().await?;
        }
        Ok(true)
    }

    /// The current hold count (0 when not held).
    pub async fn hold_count(&self) -> u32 {
        self.held.lock().await.as_ref().map_or(0, |h| h.count)
    }

    /// Whether the current hold (if any) has been revoked.
    pub async fn is_revoked(&self) -> bool {
        self.held
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| h.handle.is_revoked())
    }

    /// Releases any held reservation regardless of hold count.
    pub async fn destroy(&self) -> CoordResult<()> {
        let entry = self.held.lock().await.take();
        if let Some(entry) = entry {
            entry.handle.release().await?;
        }
        Ok(())
    }
}
