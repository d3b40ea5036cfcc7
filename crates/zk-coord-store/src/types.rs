//! Store-level data types.

/// Statistics about a node, similar to the UNIX `stat` structure.
///
/// Every change to the store receives a transaction id (*zxid*) exposing
/// the total ordering of all changes; version counters track changes to a
/// node's data, children, and ACL independently.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Stat {
    /// The transaction ID that created the node.
    pub czxid: i64,
    /// The last transaction that modified the node.
    pub mzxid: i64,
    /// Milliseconds since epoch when the node was created.
    pub ctime: i64,
    /// Milliseconds since epoch when the node was last modified.
    pub mtime: i64,
    /// The number of changes to the data of the node.
    pub version: i32,
    /// The number of changes to the children of the node.
    pub cversion: i32,
    /// The session ID of the owner if this is an ephemeral node, else 0.
    pub ephemeral_owner: i64,
    /// The length of the data field of the node.
    pub data_length: i32,
    /// The number of children this node has.
    pub num_children: i32,
    /// The transaction ID that last modified the children of the node.
    pub pzxid: i64,
}

/// How a node is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    /// The node survives the creating session.
    Persistent,
    /// The node is deleted when the creating session ends.
    Ephemeral,
    /// Persistent, with a store-assigned monotonically increasing sequence
    /// suffix appended to the requested name. The suffix is a fixed-length
    /// 10-digit, zero-padded decimal.
    PersistentSequential,
    /// Ephemeral and sequential.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Identity of one session issued by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// What changed at a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// A single-fire watch notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub path: String,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is established and usable.
    SyncConnected,
    /// The connection dropped; the session may still be resumable.
    Disconnected,
    /// The session expired; a new identity is required.
    Expired,
    /// The session was closed by the client.
    Closed,
}

/// Everything a connection's sequential notification channel can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Session(SessionEvent),
    Watch(WatchedEvent),
}
