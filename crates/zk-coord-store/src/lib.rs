//! Coordination-store contract and an in-process reference backend.
//!
//! The store is a hierarchical namespace of nodes with ZooKeeper-class
//! semantics: ephemeral and sequential create modes, single-fire watches
//! on data and children, and sessions whose expiry deletes their
//! ephemeral nodes server-side. The wire protocol of a real backend is
//! out of scope here; [`RawSession`]/[`StoreConnector`] are the seams an
//! adapter over a real client library implements, and [`MemoryStore`] is
//! a complete in-process implementation used by tests, benches, and
//! single-process deployments.

pub mod memory;
pub mod paths;
pub mod session;
pub mod types;

pub use memory::MemoryStore;
pub use session::{RawSession, StoreConnector};
pub use types::{
    CreateMode, EventKind, SessionEvent, SessionId, Stat, StoreEvent, WatchedEvent,
};
