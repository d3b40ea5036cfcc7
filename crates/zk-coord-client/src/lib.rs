//! Resilient coordination-store client.
//!
//! [`ResilientClient`] wraps a raw store session with connection-state
//! tracking, automatic reconnect under backoff, retry of session-class
//! failures, and watch re-registration after session loss. Watch events
//! keep the [`PathCache`] coherent and are fanned out to registered
//! observers by the [`ObserverManager`].

pub mod cache;
pub mod client;
pub mod observer;

pub use cache::{CacheStats, NullPathCache, PathCache, PathCacheEntry, ShardedPathCache};
pub use client::{ClientConfig, ConnectionState, ResilientClient};
pub use observer::{ObserverManager, PathObserver};
