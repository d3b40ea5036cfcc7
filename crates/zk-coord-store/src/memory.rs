//! In-process coordination store with ZooKeeper-class semantics.
//!
//! A single shared tree behind a mutex. Not a replicated backend --
//! it exists so the layers above can be exercised end to end: sequential
//! ephemeral nodes, single-fire watches, and session expiry that deletes
//! ephemerals server-side all behave as the contract demands.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use zk_coord_core::error::{CoordError, CoordResult, NodeError};

use crate::paths;
use crate::session::{RawSession, StoreConnector};
use crate::types::{
    CreateMode, EventKind, SessionEvent, SessionId, Stat, StoreEvent, WatchedEvent,
};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct NodeRecord {
    data: Vec<u8>,
    czxid: i64,
    mzxid: i64,
    ctime: i64,
    mtime: i64,
    version: i32,
    cversion: i32,
    pzxid: i64,
    /// Owning session id for ephemerals; 0 for persistent nodes.
    ephemeral_owner: u64,
    children: BTreeSet<String>,
    /// Monotonic counter for sequential children; survives child deletion.
    next_sequence: u64,
}

impl NodeRecord {
    fn new(data: Vec<u8>, zxid: i64, ephemeral_owner: u64) -> Self {
        let now = now_millis();
        Self {
            data,
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            version: 0,
            cversion: 0,
            pzxid: zxid,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            ctime: self.ctime,
            mtime: self.mtime,
            version: self.version,
            cversion: self.cversion,
            ephemeral_owner: self.ephemeral_owner as i64,
            data_length: self.data.len() as i32,
            num_children: self.children.len() as i32,
            pzxid: self.pzxid,
        }
    }
}

struct SessionRecord {
    alive: bool,
    events: mpsc::UnboundedSender<StoreEvent>,
    ephemerals: BTreeSet<String>,
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<String, NodeRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
    data_watches: HashMap<String, Vec<SessionId>>,
    child_watches: HashMap<String, Vec<SessionId>>,
    next_zxid: i64,
    next_session_id: u64,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Tree::default();
        tree.nodes
            .insert("/".to_string(), NodeRecord::new(Vec::new(), 0, 0));
        tree.next_zxid = 1;
        tree.next_session_id = 1;
        tree
    }

    fn zxid(&mut self) -> i64 {
        let z = self.next_zxid;
        self.next_zxid += 1;
        z
    }

    fn check_alive(&self, id: SessionId) -> CoordResult<()> {
        match self.sessions.get(&id) {
            Some(s) if s.alive => Ok(()),
            _ => Err(CoordError::Session(format!(
                "session {} is expired or closed",
                id.0
            ))),
        }
    }

    fn register_watch(
        watches: &mut HashMap<String, Vec<SessionId>>,
        path: &str,
        session: SessionId,
    ) {
        let entry = watches.entry(path.to_string()).or_default();
        if !entry.contains(&session) {
            entry.push(session);
        }
    }

    /// Fires and removes every watch of the given table at `path`.
    fn fire_watches(&mut self, table: WatchTable, path: &str, kind: EventKind) {
        let watches = match table {
            WatchTable::Data => &mut self.data_watches,
            WatchTable::Child => &mut self.child_watches,
        };
        let Some(watchers) = watches.remove(path) else {
            return;
        };
        let event = WatchedEvent {
            kind,
            path: path.to_string(),
        };
        for session in watchers {
            if let Some(record) = self.sessions.get(&session) {
                if record.alive {
                    let _ = record.events.send(StoreEvent::Watch(event.clone()));
                }
            }
        }
    }

    /// Removes one node, updating parent bookkeeping and firing watches.
    /// The node must exist and have no children.
    fn remove_node(&mut self, path: &str) {
        let Some(node) = self.nodes.remove(path) else {
            return;
        };
        let zxid = self.zxid();
        if let Some(parent) = paths::parent_of(path) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.remove(paths::node_name(path));
                parent_node.cversion += 1;
                parent_node.pzxid = zxid;
            }
        }
        if node.ephemeral_owner != 0 {
            if let Some(owner) = self.sessions.get_mut(&SessionId(node.ephemeral_owner)) {
                owner.ephemerals.remove(path);
            }
        }
        self.fire_watches(WatchTable::Data, path, EventKind::NodeDeleted);
        self.fire_watches(WatchTable::Child, path, EventKind::NodeDeleted);
        if let Some(parent) = paths::parent_of(path) {
            let parent = parent.to_string();
            self.fire_watches(WatchTable::Child, &parent, EventKind::NodeChildrenChanged);
        }
    }

    /// Ends a session: deletes its ephemerals, drops its watch registrations,
    /// and emits the final session event.
    fn end_session(&mut self, id: SessionId, event: SessionEvent) {
        let ephemerals = match self.sessions.get_mut(&id) {
            Some(record) if record.alive => {
                record.alive = false;
                std::mem::take(&mut record.ephemerals)
            }
            _ => return,
        };
        for path in ephemerals.iter().rev() {
            self.remove_node(path);
        }
        for watches in [&mut self.data_watches, &mut self.child_watches] {
            for watchers in watches.values_mut() {
                watchers.retain(|s| *s != id);
            }
            watches.retain(|_, watchers| !watchers.is_empty());
        }
        if let Some(record) = self.sessions.get(&id) {
            let _ = record.events.send(StoreEvent::Session(event));
        }
    }
}

#[derive(Clone, Copy)]
enum WatchTable {
    Data,
    Child,
}

/// In-process store implementing [`StoreConnector`].
///
/// Cloning shares the same tree. Includes hooks for driving failure
/// scenarios from tests: session expiry, forced node deletion, and a
/// connectivity toggle.
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    connectable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            connectable: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// When false, `connect()` fails with a connection error.
    pub fn set_connectable(&self, connectable: bool) {
        self.connectable.store(connectable, Ordering::SeqCst);
    }

    /// Expires a session: its ephemerals are deleted server-side (firing
    /// the resulting watches) and the session's channel receives `Expired`.
    pub fn expire_session(&self, id: SessionId) {
        debug!(session = id.0, "expiring session");
        self.lock().end_session(id, SessionEvent::Expired);
    }

    /// Deletes a node out from under its owner, as an operator or another
    /// process might. No-op if the node is absent or has children.
    pub fn force_delete(&self, path: &str) {
        let mut tree = self.lock();
        let deletable = tree
            .nodes
            .get(path)
            .is_some_and(|node| node.children.is_empty());
        if deletable {
            tree.remove_node(path);
        }
    }

    /// Number of armed watches (data + child) at a path.
    pub fn watch_count(&self, path: &str) -> usize {
        let tree = self.lock();
        tree.data_watches.get(path).map_or(0, Vec::len)
            + tree.child_watches.get(path).map_or(0, Vec::len)
    }

    /// Whether a node currently exists.
    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    /// Child names of a node, sorted; empty if the node is absent.
    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.lock()
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(
        &self,
    ) -> CoordResult<(Arc<dyn RawSession>, mpsc::UnboundedReceiver<StoreEvent>)> {
        if !self.connectable.load(Ordering::SeqCst) {
            return Err(CoordError::Connection("store unreachable".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut tree = self.lock();
            let id = SessionId(tree.next_session_id);
            tree.next_session_id += 1;
            tree.sessions.insert(
                id,
                SessionRecord {
                    alive: true,
                    events: tx.clone(),
                    ephemerals: BTreeSet::new(),
                },
            );
            id
        };
        let _ = tx.send(StoreEvent::Session(SessionEvent::SyncConnected));
        debug!(session = id.0, "memory store session established");
        let session = MemorySession {
            id,
            tree: self.tree.clone(),
        };
        Ok((Arc::new(session), rx))
    }
}

struct MemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
}

impl MemorySession {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RawSession for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordResult<String> {
        paths::validate(path)?;
        let mut tree = self.lock();
        tree.check_alive(self.id)?;

        let parent = paths::parent_of(path)
            .ok_or_else(|| CoordError::Config("cannot create the root node".to_string()))?
            .to_string();

        let assigned = if mode.is_sequential() {
            let parent_node = tree
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| NodeError::NoNode(parent.clone()))?;
            let sequence = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{path}{sequence:010}")
        } else {
            if !tree.nodes.contains_key(&parent) {
                return Err(NodeError::NoNode(parent).into());
            }
            if tree.nodes.contains_key(path) {
                return Err(NodeError::NodeExists(path.to_string()).into());
            }
            path.to_string()
        };

        let zxid = tree.zxid();
        let owner = if mode.is_ephemeral() { self.id.0 } else { 0 };
        tree.nodes
            .insert(assigned.clone(), NodeRecord::new(data, zxid, owner));
        if let Some(parent_node) = tree.nodes.get_mut(&parent) {
            parent_node
                .children
                .insert(paths::node_name(&assigned).to_string());
            parent_node.cversion += 1;
            parent_node.pzxid = zxid;
        }
        if mode.is_ephemeral() {
            if let Some(session) = tree.sessions.get_mut(&self.id) {
                session.ephemerals.insert(assigned.clone());
            }
        }
        tree.fire_watches(WatchTable::Data, &assigned, EventKind::NodeCreated);
        tree.fire_watches(WatchTable::Child, &parent, EventKind::NodeChildrenChanged);
        Ok(assigned)
    }

    async fn delete(&self, path: &str, expected_version: i32) -> CoordResult<()> {
        let mut tree = self.lock();
        tree.check_alive(self.id)?;
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(NodeError::NotEmpty(path.to_string()).into());
        }
        if expected_version != -1 && expected_version != node.version {
            return Err(NodeError::BadVersion(path.to_string()).into());
        }
        tree.remove_node(path);
        Ok(())
    }

    async fn exists(&self, path: &str, watch: bool) -> CoordResult<Option<Stat>> {
        let mut tree = self.lock();
        tree.check_alive(self.id)?;
        if watch {
            // Data watches may be armed on absent paths (fires on create).
            Tree::register_watch(&mut tree.data_watches, path, self.id);
        }
        Ok(tree.nodes.get(path).map(NodeRecord::stat))
    }

    async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>> {
        let mut tree = self.lock();
        tree.check_alive(self.id)?;
        let children: Vec<String> = tree
            .nodes
            .get(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?
            .children
            .iter()
            .cloned()
            .collect();
        if watch {
            Tree::register_watch(&mut tree.child_watches, path, self.id);
        }
        Ok(children)
    }

    async fn get_data(&self, path: &str, watch: bool) -> CoordResult<(Vec<u8>, Stat)> {
        let mut tree = self.lock();
        tree.check_alive(self.id)?;
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?;
        let result = (node.data.clone(), node.stat());
        if watch {
            Tree::register_watch(&mut tree.data_watches, path, self.id);
        }
        Ok(result)
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i32,
    ) -> CoordResult<Stat> {
        let mut tree = self.lock();
        tree.check_alive(self.id)?;
        let zxid = tree.zxid();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?;
        if expected_version != -1 && expected_version != node.version {
            return Err(NodeError::BadVersion(path.to_string()).into());
        }
        node.data = data;
        node.version += 1;
        node.mzxid = zxid;
        node.mtime = now_millis();
        let stat = node.stat();
        tree.fire_watches(WatchTable::Data, path, EventKind::NodeDataChanged);
        Ok(stat)
    }

    async fn sync(&self, _path: &str) -> CoordResult<()> {
        // Single shared tree: every session already sees the latest state.
        self.lock().check_alive(self.id)
    }

    async fn close(&self) {
        self.lock().end_session(self.id, SessionEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(store: &MemoryStore) -> (Arc<dyn RawSession>, mpsc::UnboundedReceiver<StoreEvent>) {
        store.connect().await.unwrap()
    }

    #[tokio::test]
    async fn sequential_suffixes_are_monotonic_and_zero_padded() {
        let store = MemoryStore::new();
        let (session, _rx) = connect(&store).await;
        session
            .create("/locks", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let a = session
            .create("/locks/res_", Vec::new(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let b = session
            .create("/locks/res_", Vec::new(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(a, "/locks/res_0000000000");
        assert_eq!(b, "/locks/res_0000000001");

        // Counter survives deletion of earlier children.
        session.delete(&a, -1).await.unwrap();
        let c = session
            .create("/locks/res_", Vec::new(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(c, "/locks/res_0000000002");
    }

    #[tokio::test]
    async fn expiry_deletes_ephemerals_and_fires_watches() {
        let store = MemoryStore::new();
        let (owner, _owner_rx) = connect(&store).await;
        let (watcher, mut watcher_rx) = connect(&store).await;

        owner
            .create("/e", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let node = owner
            .create("/e/n_", Vec::new(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert!(watcher.exists(&node, true).await.unwrap().is_some());

        store.expire_session(owner.session_id());
        assert!(!store.node_exists(&node));

        // Skip the watcher's own SyncConnected.
        let mut saw_deletion = false;
        while let Ok(event) = watcher_rx.try_recv() {
            if let StoreEvent::Watch(w) = event {
                assert_eq!(w.kind, EventKind::NodeDeleted);
                assert_eq!(w.path, node);
                saw_deletion = true;
            }
        }
        assert!(saw_deletion);

        // The expired session can no longer operate.
        let err = owner.exists("/e", false).await.unwrap_err();
        assert!(matches!(err, CoordError::Session(_)));
    }

    #[tokio::test]
    async fn watches_fire_once_per_registration() {
        let store = MemoryStore::new();
        let (session, mut rx) = connect(&store).await;
        session
            .create("/w", b"v0".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();
        session.get_data("/w", true).await.unwrap();
        assert_eq!(store.watch_count("/w"), 1);

        session.set_data("/w", b"v1".to_vec(), -1).await.unwrap();
        session.set_data("/w", b"v2".to_vec(), -1).await.unwrap();

        let mut data_changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                StoreEvent::Watch(WatchedEvent {
                    kind: EventKind::NodeDataChanged,
                    ..
                })
            ) {
                data_changes += 1;
            }
        }
        assert_eq!(data_changes, 1);
        assert_eq!(store.watch_count("/w"), 0);
    }

    #[tokio::test]
    async fn node_errors_are_reported() {
        let store = MemoryStore::new();
        let (session, _rx) = connect(&store).await;
        session
            .create("/p", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        session
            .create("/p/c", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();

        let err = session.delete("/p", -1).await.unwrap_err();
        assert!(matches!(err, CoordError::Node(NodeError::NotEmpty(_))));

        let err = session
            .create("/p/c", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Node(NodeError::NodeExists(_))));

        let err = session
            .set_data("/p/c", b"x".to_vec(), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Node(NodeError::BadVersion(_))));

        let err = session.get_data("/missing", false).await.unwrap_err();
        assert!(matches!(err, CoordError::Node(NodeError::NoNode(_))));
    }
}
