//! Core traits for coordination-store locks and semaphores.

use std::future::Future;
use std::time::Duration;

use crate::error::CoordResult;

// ============================================================================
// Lock Handle Trait
// ============================================================================

/// Handle to a held lock, shared lock, or semaphore permit.
///
/// Release is explicit: call `release()` on every exit path. Dropping the
/// handle triggers best-effort cleanup only, and a distributed resource
/// should never rely on drop timing.
///
/// # Example
///
/// ```rust,ignore
/// let handle = lock.acquire(None).await?;
/// // Critical section - we hold the lock
/// do_work().await;
/// // Explicit release with error handling
/// handle.release().await?;
/// ```
pub trait LockHandle: Send + Sync + Sized {
    /// Returns a receiver that signals when the reservation is revoked.
    ///
    /// The receiver yields `true` when the reservation node backing this
    /// handle disappeared without this handle's own `release()` -- for
    /// example because the session expired and the store deleted its
    /// ephemeral nodes. Revocation is a side-channel, never an error.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// tokio::select! {
    ///     _ = handle.lost_token().clone().changed() => {
    ///         eprintln!("Reservation was revoked!");
    ///     }
    ///     _ = do_work() => {
    ///         // Work completed while still holding the lock
    ///     }
    /// }
    /// ```
    fn lost_token(&self) -> &tokio::sync::watch::Receiver<bool>;

    /// Whether the reservation backing this handle has been revoked.
    fn is_revoked(&self) -> bool {
        *self.lost_token().borrow()
    }

    /// Explicitly releases the reservation.
    fn release(self) -> impl Future<Output = CoordResult<()>> + Send;
}

// ============================================================================
// Distributed Lock Trait
// ============================================================================

/// A distributed mutual exclusion lock.
///
/// Provides exclusive access to a resource identified by `name` across
/// processes and machines. Acquisition order is fair: holders acquire in
/// the order the store assigned their reservation sequence numbers.
///
/// # Example
///
/// ```rust,ignore
/// use zk_coord_core::DistributedLock;
///
/// async fn protected_operation(lock: &impl DistributedLock) -> CoordResult<()> {
///     // Acquire with 5 second timeout
///     let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
///
///     // We have exclusive access
///     perform_critical_section().await?;
///
///     handle.release().await?;
///     Ok(())
/// }
/// ```
pub trait DistributedLock: Send + Sync {
    /// The handle type returned when the lock is acquired.
    type Handle: LockHandle + Send;

    /// Returns the unique name identifying this lock.
    fn name(&self) -> &str;

    /// Acquires the lock, waiting up to `timeout`.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait. `None` means wait indefinitely.
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - Lock acquired successfully
    /// * `Err(CoordError::Timeout)` - Timeout expired before lock acquired;
    ///   the pending reservation node has been deleted
    /// * `Err(CoordError::Connection)` / `Err(CoordError::Session)` -
    ///   backend failure after the retry strategy was exhausted
    fn acquire(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CoordResult<Self::Handle>> + Send;

    /// Attempts to acquire the lock without waiting.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(handle))` - Lock acquired successfully
    /// * `Ok(None)` - Lock is held by another owner
    /// * `Err(...)` - Error occurred during the attempt
    fn try_acquire(&self) -> impl Future<Output = CoordResult<Option<Self::Handle>>> + Send;
}

// ============================================================================
// Reader-Writer Lock Trait
// ============================================================================

/// A distributed reader-writer lock.
///
/// Allows multiple concurrent readers OR a single exclusive writer.
/// Readers block only on earlier writers; a writer blocks on all earlier
/// readers and writers, and blocks all later readers.
///
/// # Example
///
/// ```rust,ignore
/// // Multiple readers can hold the lock simultaneously
/// let read_handle = lock.acquire_read(None).await?;
/// let data = read_shared_resource().await;
/// read_handle.release().await?;
///
/// // Writers get exclusive access
/// let write_handle = lock.acquire_write(None).await?;
/// modify_shared_resource().await;
/// write_handle.release().await?;
/// ```
pub trait DistributedReaderWriterLock: Send + Sync {
    /// Handle type for read (shared) locks.
    type ReadHandle: LockHandle + Send;
    /// Handle type for write (exclusive) locks.
    type WriteHandle: LockHandle + Send;

    /// Returns the unique name identifying this lock.
    fn name(&self) -> &str;

    /// Acquires a read (shared) lock.
    ///
    /// Multiple readers can hold the lock concurrently.
    /// Blocks if a writer reservation has a lower sequence number.
    fn acquire_read(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CoordResult<Self::ReadHandle>> + Send;

    /// Attempts to acquire a read lock without waiting.
    fn try_acquire_read(
        &self,
    ) -> impl Future<Output = CoordResult<Option<Self::ReadHandle>>> + Send;

    /// Acquires a write (exclusive) lock.
    ///
    /// Only one writer can hold the lock. Blocks all later readers.
    fn acquire_write(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CoordResult<Self::WriteHandle>> + Send;

    /// Attempts to acquire a write lock without waiting.
    fn try_acquire_write(
        &self,
    ) -> impl Future<Output = CoordResult<Option<Self::WriteHandle>>> + Send;
}

// ============================================================================
// Semaphore Trait
// ============================================================================

/// A distributed counting semaphore.
///
/// Allows up to the current permit pool size of concurrent holders. The
/// pool size is live: it may be backed by an observable configuration
/// value and change during the semaphore's lifetime.
///
/// # Example
///
/// ```rust,ignore
/// // Create a semaphore allowing 5 concurrent database connections
/// let semaphore = provider.create_semaphore("db-pool", 5);
///
/// // Acquire a permit
/// let permit = semaphore.acquire(None).await?;
///
/// // Use the limited resource
/// use_database_connection().await;
///
/// // Release the permit
/// permit.release().await?;
/// ```
pub trait DistributedSemaphore: Send + Sync {
    /// Handle type for held permits.
    type Handle: LockHandle + Send;

    /// Returns the unique name identifying this semaphore.
    fn name(&self) -> &str;

    /// Returns the current permit pool size.
    fn permit_pool_size(&self) -> u32;

    /// Acquires a permit.
    ///
    /// Blocks while the pool is exhausted.
    fn acquire(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CoordResult<Self::Handle>> + Send;

    /// Attempts to acquire a permit without waiting.
    fn try_acquire(&self) -> impl Future<Output = CoordResult<Option<Self::Handle>>> + Send;
}

// ============================================================================
// Provider Traits
// ============================================================================

/// Factory for creating distributed locks by name.
///
/// Providers encapsulate backend configuration, allowing application code
/// to be backend-agnostic.
///
/// # Example
///
/// ```rust,ignore
/// // Configure once at startup
/// let provider = ZkCoordProvider::builder().connector(store).build().await?;
///
/// // Create locks by name anywhere in the application
/// let lock = provider.create_lock("my-resource");
/// let handle = lock.acquire(None).await?;
/// ```
pub trait LockProvider: Send + Sync {
    /// The lock type created by this provider.
    type Lock: DistributedLock;

    /// Creates a lock with the given name.
    fn create_lock(&self, name: &str) -> Self::Lock;
}

/// Factory for creating reader-writer locks by name.
pub trait ReaderWriterLockProvider: Send + Sync {
    /// The lock type created by this provider.
    type Lock: DistributedReaderWriterLock;

    /// Creates a reader-writer lock with the given name.
    fn create_reader_writer_lock(&self, name: &str) -> Self::Lock;
}

/// Factory for creating semaphores by name.
pub trait SemaphoreProvider: Send + Sync {
    /// The semaphore type created by this provider.
    type Semaphore: DistributedSemaphore;

    /// Creates a semaphore with the given name and fixed permit pool size.
    fn create_semaphore(&self, name: &str, permits: u32) -> Self::Semaphore;
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait providing convenience methods for lock providers.
pub trait LockProviderExt: LockProvider {
    /// Acquires a lock by name, returning the handle.
    ///
    /// Convenience method combining `create_lock` and `acquire`.
    fn acquire_lock(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CoordResult<<Self::Lock as DistributedLock>::Handle>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.acquire(timeout).await
        }
    }

    /// Tries to acquire a lock by name.
    ///
    /// Convenience method combining `create_lock` and `try_acquire`.
    fn try_acquire_lock(
        &self,
        name: &str,
    ) -> impl Future<Output = CoordResult<Option<<Self::Lock as DistributedLock>::Handle>>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.try_acquire().await
        }
    }
}

// Blanket implementation for all LockProviders
impl<T: LockProvider> LockProviderExt for T {}
