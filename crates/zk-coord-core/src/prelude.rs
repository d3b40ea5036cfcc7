//! Convenience prelude for coordination lock types.

pub use crate::backoff::{BackoffPolicy, BackoffStrategy};
pub use crate::error::{CoordError, CoordResult, NodeError};
pub use crate::traits::{
    DistributedLock, DistributedReaderWriterLock, DistributedSemaphore, LockHandle,
    LockProvider, LockProviderExt, ReaderWriterLockProvider, SemaphoreProvider,
};
