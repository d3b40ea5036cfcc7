//! The store operation contract.
//!
//! These traits are object-safe so the resilient client can hold whatever
//! backend it was handed. All watches are single-fire: once an armed watch
//! delivers an event on the connection's channel, the registration is gone
//! and must be renewed by re-issuing a watched read.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use zk_coord_core::error::CoordResult;

use crate::types::{CreateMode, SessionId, Stat, StoreEvent};

/// One live session against the coordination store.
///
/// Operations fail with `CoordError::Session` once the session is expired
/// or closed, and with `CoordError::Node` for node-level conditions.
#[async_trait]
pub trait RawSession: Send + Sync {
    /// The identity the store issued for this session.
    fn session_id(&self) -> SessionId;

    /// Creates a node, returning the assigned path (which differs from the
    /// requested path for sequential modes).
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordResult<String>;

    /// Deletes a node. `expected_version` of `-1` means "any version".
    async fn delete(&self, path: &str, expected_version: i32) -> CoordResult<()>;

    /// Returns the node's stat, or `None` if it does not exist. With
    /// `watch`, arms a data watch at the path whether or not it exists.
    async fn exists(&self, path: &str, watch: bool) -> CoordResult<Option<Stat>>;

    /// Returns the node's child names (order unspecified). With `watch`,
    /// arms a child watch.
    async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>>;

    /// Returns the node's data and stat. With `watch`, arms a data watch.
    async fn get_data(&self, path: &str, watch: bool) -> CoordResult<(Vec<u8>, Stat)>;

    /// Replaces the node's data, checking `expected_version` (`-1` = any).
    async fn set_data(&self, path: &str, data: Vec<u8>, expected_version: i32)
        -> CoordResult<Stat>;

    /// Flushes pending changes for the path's subtree to this session's view.
    async fn sync(&self, path: &str) -> CoordResult<()>;

    /// Closes the session, deleting its ephemeral nodes.
    async fn close(&self);
}

/// Establishes sessions against a store.
///
/// Each successful connect yields a fresh session plus the single
/// sequential notification channel carrying its session and watch events.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
    ) -> CoordResult<(Arc<dyn RawSession>, mpsc::UnboundedReceiver<StoreEvent>)>;
}
