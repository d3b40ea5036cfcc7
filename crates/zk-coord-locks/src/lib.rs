//! Distributed locks, reader-writer locks, and counting semaphores over a
//! ZooKeeper-class coordination store.
//!
//! Acquisition is fair: each attempt creates a sequential ephemeral
//! reservation node under the entity path and waits for its nearest
//! blocking predecessor, so holders proceed in store-assigned sequence
//! order. Held reservations lost to session expiry or external deletion
//! are reported as revocations through the handle's `lost_token()`
//! channel, never as errors.

pub mod handle;
pub mod lock;
pub mod paths;
pub mod permit;
pub mod provider;
pub mod reentrant;
pub mod reservation;
pub mod rw_lock;
pub mod semaphore;

pub use handle::ZkLockHandle;
pub use lock::ZkDistributedLock;
pub use paths::{EntityPathBuilder, ReservationCategory, ReservationType};
pub use permit::{
    write_pool_size, ConfiguredPermitPoolSize, FixedPermitPoolSize, PermitPoolSize,
};
pub use provider::{ZkCoordProvider, ZkCoordProviderBuilder};
pub use reentrant::ReentrantZkLock;
pub use reservation::{AcquireMode, Reservation, ReservationManager, RevocationObserver};
pub use rw_lock::ZkReaderWriterLock;
pub use semaphore::ZkSemaphore;
