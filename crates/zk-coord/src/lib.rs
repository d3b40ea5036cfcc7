//! Coordination primitives over a ZooKeeper-class store.
//!
//! This crate provides distributed synchronization primitives (mutex
//! locks, reader-writer locks, counting semaphores) built on a
//! hierarchical, watch-capable coordination store: sequential ephemeral
//! reservation nodes define fair acquisition order, and a resilient
//! client survives connection loss and session expiry transparently.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zk_coord::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect a provider (example: the in-process backend)
//!     let provider = ZkCoordProvider::builder()
//!         .connector(Arc::new(MemoryStore::new()))
//!         .cluster_id("cluster-1")
//!         .build()
//!         .await?;
//!
//!     // Create a lock by name
//!     let lock = provider.create_lock("my-resource");
//!
//!     // Acquire the lock with a timeout
//!     let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
//!
//!     // Critical section - we have exclusive access
//!     println!("Doing critical work...");
//!
//!     // Release the lock explicitly
//!     handle.release().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Exclusive Locks**: Fair mutual exclusion across processes
//! - **Reader-Writer Locks**: Multiple readers or single writer
//! - **Semaphores**: Limit concurrent access to a live permit bound
//! - **Reentrant Locks**: Same-owner nesting over one reservation
//! - **Revocation Detection**: Know when a held reservation is lost
//! - **Resilient Client**: Reconnects, retries, and re-arms watches
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `zk-coord-core`: Core traits, errors, backoff strategies
//! - `zk-coord-store`: Store contract and the in-process backend
//! - `zk-coord-client`: Resilient client, path cache, observers
//! - `zk-coord-locks`: Reservation protocol and lock facades
//!
//! For fine-grained control, you can depend on individual crates instead.

// Re-export core types and traits
pub use zk_coord_core::*;

// Re-export the store contract and in-process backend
#[allow(ambiguous_glob_reexports)]
pub use zk_coord_store::*;

// Re-export the resilient client layer
#[allow(ambiguous_glob_reexports)]
pub use zk_coord_client::*;

// Re-export the lock facades
#[allow(ambiguous_glob_reexports)]
pub use zk_coord_locks::*;
