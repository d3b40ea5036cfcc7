//! Resilient store client.
//!
//! Wraps a [`RawSession`] with connection-state tracking, automatic
//! reconnect under backoff, transparent retry of session-class failures,
//! and re-registration of watches after the session identity changes.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use zk_coord_core::backoff::{BackoffPolicy, BackoffStrategy};
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_store::session::{RawSession, StoreConnector};
use zk_coord_store::types::{
    CreateMode, EventKind, SessionEvent, SessionId, Stat, StoreEvent, WatchedEvent,
};

use crate::cache::PathCache;
use crate::observer::ObserverManager;

/// Connection lifecycle states.
///
/// `Shutdown` is terminal: once reached, no reconnect is attempted and
/// every operation fails with [`CoordError::Shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    SessionExpired,
    Shutdown,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Governs both reconnect attempts and per-operation retry waits.
    pub backoff: BackoffPolicy,
    /// How long a retried operation waits for re-connection before a
    /// fresh reconnect is forced.
    pub assume_error_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            assume_error_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct WatchTables {
    data: HashSet<String>,
    children: HashSet<String>,
}

struct Inner {
    connector: Arc<dyn StoreConnector>,
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Option<Arc<dyn RawSession>>>,
    watches: Mutex<WatchTables>,
    reconnecting: AtomicBool,
    observers: Arc<ObserverManager>,
    cache: Arc<dyn PathCache>,
}

/// Store client that survives connection loss and session expiry.
///
/// Every operation first awaits connection initialization (bounded by the
/// configured backoff strategy), then executes; session-class errors are
/// retried after re-connection, non-session errors propagate immediately.
/// Reconnection is single-flight: concurrent triggers coalesce, and all
/// blocked callers are released together when the connection returns.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<Inner>,
}

impl ResilientClient {
    /// Connects to the store and waits for the first session, bounded by
    /// the configured backoff strategy.
    pub async fn connect(
        connector: Arc<dyn StoreConnector>,
        config: ClientConfig,
        cache: Arc<dyn PathCache>,
        observers: Arc<ObserverManager>,
    ) -> CoordResult<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let client = Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                session: Mutex::new(None),
                watches: Mutex::new(WatchTables::default()),
                reconnecting: AtomicBool::new(false),
                observers,
                cache,
            }),
        };
        Inner::trigger_reconnect(&client.inner);
        let mut strategy = client.inner.config.backoff.strategy();
        client.await_connected(strategy.as_mut()).await?;
        Ok(client)
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver tracking connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The identity of the current session, if connected.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock_session().as_ref().map(|s| s.session_id())
    }

    pub fn observers(&self) -> &Arc<ObserverManager> {
        &self.inner.observers
    }

    pub fn cache(&self) -> &Arc<dyn PathCache> {
        &self.inner.cache
    }

    /// Shuts the client down. Terminal: all subsequent operations fail
    /// fast and no reconnection is attempted.
    pub async fn shutdown(&self) {
        // send_replace: the value must change even with no receiver alive.
        self.inner.state.send_replace(ConnectionState::Shutdown);
        let session = self.inner.lock_session().take();
        if let Some(session) = session {
            session.close().await;
        }
        info!("client shut down");
    }

    // ------------------------------------------------------------------
    // Store operations
    // ------------------------------------------------------------------

    /// Creates a node, returning the assigned path.
    pub async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordResult<String> {
        self.with_retry(|session| {
            let data = data.to_vec();
            async move { session.create(path, data, mode).await }
        })
        .await
    }

    /// Deletes a node. Idempotent: deleting an already-absent node
    /// succeeds (the raw session still reports `NoNode` for callers that
    /// need the distinction).
    pub async fn delete(&self, path: &str, expected_version: i32) -> CoordResult<()> {
        let result = self
            .with_retry(|session| async move { session.delete(path, expected_version).await })
            .await;
        match result {
            Err(ref e) if e.is_no_node() => {
                debug!(path, "delete of absent node treated as success");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn exists(&self, path: &str, watch: bool) -> CoordResult<Option<Stat>> {
        let stat = self
            .with_retry(|session| async move { session.exists(path, watch).await })
            .await?;
        if watch {
            self.inner.track_data_watch(path);
        }
        Ok(stat)
    }

    pub async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>> {
        let children = self
            .with_retry(|session| async move { session.get_children(path, watch).await })
            .await?;
        if watch {
            self.inner.track_child_watch(path);
        }
        Ok(children)
    }

    pub async fn get_data(&self, path: &str, watch: bool) -> CoordResult<(Vec<u8>, Stat)> {
        let result = self
            .with_retry(|session| async move { session.get_data(path, watch).await })
            .await?;
        if watch {
            self.inner.track_data_watch(path);
        }
        Ok(result)
    }

    pub async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> CoordResult<Stat> {
        self.with_retry(|session| {
            let data = data.to_vec();
            async move { session.set_data(path, data, expected_version).await }
        })
        .await
    }

    pub async fn sync(&self, path: &str) -> CoordResult<()> {
        self.with_retry(|session| async move { session.sync(path).await })
            .await
    }

    // ------------------------------------------------------------------
    // Cache-aware reads
    // ------------------------------------------------------------------

    /// Existence check served from the path cache when possible.
    pub async fn exists_cached(&self, path: &str) -> CoordResult<Option<Stat>> {
        if let Some(entry) = self.inner.cache.get(path) {
            return Ok(Some(entry.stat));
        }
        let stat = self.exists(path, false).await?;
        if let Some(stat) = stat {
            self.inner.cache.put(path, stat, None, None);
        }
        Ok(stat)
    }

    /// Data read served from the path cache when fresh enough.
    /// `ttl_millis` of 0 accepts any cached entry that carries data.
    pub async fn get_data_cached(
        &self,
        path: &str,
        ttl_millis: u64,
    ) -> CoordResult<(Vec<u8>, Stat)> {
        if let Some(entry) = self.inner.cache.get_fresh(path, ttl_millis) {
            if let Some(data) = entry.data {
                return Ok((data.to_vec(), entry.stat));
            }
        }
        let (data, stat) = self.get_data(path, false).await?;
        self.inner.cache.put(path, stat, Some(data.clone()), None);
        Ok((data, stat))
    }

    // ------------------------------------------------------------------
    // Retry machinery
    // ------------------------------------------------------------------

    /// Runs one store operation under the configured retry policy.
    ///
    /// Session-class failures trigger a reconnect and are retried while
    /// the strategy allows; everything else propagates unchanged.
    async fn with_retry<T, F, Fut>(&self, f: F) -> CoordResult<T>
    where
        F: Fn(Arc<dyn RawSession>) -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        let mut strategy = self.inner.config.backoff.strategy();
        loop {
            self.await_connected(strategy.as_mut()).await?;
            let Some(session) = self.inner.lock_session().clone() else {
                // The event pump can take the session (expiry) between
                // the state check and this lookup; wait for a fresh one
                // instead of failing the operation.
                if !strategy.has_next() {
                    return Err(CoordError::Connection("no session established".to_string()));
                }
                Inner::trigger_reconnect(&self.inner);
                self.wait_recovery().await;
                continue;
            };
            match f(session).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_session_class() => {
                    if !strategy.has_next() {
                        return Err(e);
                    }
                    warn!(error = %e, "session-class failure; waiting for re-connection");
                    self.inner.mark_disconnected();
                    Inner::trigger_reconnect(&self.inner);
                    self.wait_recovery().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Blocks until the client is connected, consuming one backoff
    /// interval per wait round; fails fast once the strategy is exhausted.
    async fn await_connected(&self, strategy: &mut dyn BackoffStrategy) -> CoordResult<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Shutdown => return Err(CoordError::Shutdown),
                _ => {
                    let Some(interval) = strategy.next() else {
                        return Err(CoordError::Connection(format!(
                            "connection not established (state {state:?})"
                        )));
                    };
                    let _ = tokio::time::timeout(interval, rx.changed()).await;
                }
            }
        }
    }

    /// Waits for re-connection up to the assume-error bound, after which a
    /// fresh reconnect is forced and the caller's retry loop re-evaluates.
    async fn wait_recovery(&self) {
        let mut rx = self.inner.state.subscribe();
        let recovered = tokio::time::timeout(self.inner.config.assume_error_timeout, async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Connected | ConnectionState::Shutdown => return,
                    _ => {
                        if rx.changed().await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
        .await;
        if recovered.is_err() {
            warn!(
                timeout = ?self.inner.config.assume_error_timeout,
                "re-connection not observed in time; forcing a fresh attempt"
            );
            Inner::trigger_reconnect(&self.inner);
        }
    }

}

impl Inner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn RawSession>>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_watches(&self) -> std::sync::MutexGuard<'_, WatchTables> {
        self.watches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track_data_watch(&self, path: &str) {
        self.lock_watches().data.insert(path.to_string());
    }

    fn track_child_watch(&self, path: &str) {
        self.lock_watches().children.insert(path.to_string());
    }

    fn mark_disconnected(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|s| s.session_id() == id)
    }

    /// Starts the single-flight reconnect task; concurrent triggers
    /// coalesce onto the in-flight attempt.
    fn trigger_reconnect(inner: &Arc<Inner>) {
        if *inner.state.borrow() == ConnectionState::Shutdown {
            return;
        }
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::reconnect_loop(&inner).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(inner: &Arc<Inner>) {
        let mut strategy = inner.config.backoff.strategy();
        loop {
            if *inner.state.borrow() == ConnectionState::Shutdown {
                return;
            }
            inner.state.send_replace(ConnectionState::Connecting);
            match inner.connector.connect().await {
                Ok((session, events)) => {
                    let fresh_identity = inner.install_session(session.clone());
                    Inner::spawn_event_pump(inner, session.session_id(), events);
                    if fresh_identity {
                        inner.restore_watches(session.as_ref()).await;
                    }
                    inner.state.send_replace(ConnectionState::Connected);
                    info!(
                        session = session.session_id().0,
                        fresh_identity, "store connection established"
                    );
                    return;
                }
                Err(e) => match strategy.next() {
                    Some(interval) => {
                        // Jitter spreads reconnect storms across clients.
                        let jitter = Duration::from_millis(
                            rand::thread_rng().gen_range(0..=interval.as_millis() as u64 / 10),
                        );
                        warn!(error = %e, retry_in = ?(interval + jitter), "connect attempt failed");
                        tokio::time::sleep(interval + jitter).await;
                    }
                    None => {
                        warn!(error = %e, "connect attempts exhausted");
                        inner.state.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                },
            }
        }
    }

    /// Swaps in the new session, closing any abandoned predecessor.
    /// Returns true when the identity changed (watches must be restored).
    fn install_session(&self, session: Arc<dyn RawSession>) -> bool {
        let new_id = session.session_id();
        let old = self.lock_session().replace(session);
        match old {
            Some(old) => {
                let fresh = old.session_id() != new_id;
                if fresh {
                    tokio::spawn(async move { old.close().await });
                }
                fresh
            }
            None => true,
        }
    }

    /// Re-arms every tracked watch against a fresh session.
    ///
    /// `NoNode` is swallowed (the watched path legitimately no longer
    /// exists); other failures are logged and skipped so one bad path
    /// cannot abort the whole restoration.
    async fn restore_watches(&self, session: &dyn RawSession) {
        let (data_paths, child_paths) = {
            let watches = self.lock_watches();
            (
                watches.data.iter().cloned().collect::<Vec<_>>(),
                watches.children.iter().cloned().collect::<Vec<_>>(),
            )
        };
        debug!(
            data = data_paths.len(),
            children = child_paths.len(),
            "restoring watches after identity change"
        );
        for path in data_paths {
            if let Err(e) = session.exists(&path, true).await {
                warn!(path = %path, error = %e, "failed to restore data watch");
            }
        }
        for path in child_paths {
            match session.get_children(&path, true).await {
                Ok(_) => {}
                Err(e) if e.is_no_node() => {
                    self.lock_watches().children.remove(&path);
                }
                Err(e) => warn!(path = %path, error = %e, "failed to restore child watch"),
            }
        }
    }

    /// Runs the connection's sequential notification channel.
    ///
    /// Watch events are applied to the cache and fanned out to observers
    /// inline (observers must not block); recovery work is dispatched to
    /// separate tasks so this channel stays responsive.
    fn spawn_event_pump(
        inner: &Arc<Inner>,
        id: SessionId,
        mut events: mpsc::UnboundedReceiver<StoreEvent>,
    ) {
        let inner = inner.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    StoreEvent::Session(SessionEvent::SyncConnected) => {}
                    StoreEvent::Session(SessionEvent::Disconnected) => {
                        if inner.is_current(id)
                            && *inner.state.borrow() != ConnectionState::Shutdown
                        {
                            warn!(session = id.0, "connection lost");
                            inner.state.send_replace(ConnectionState::Disconnected);
                            Inner::trigger_reconnect(&inner);
                        }
                    }
                    StoreEvent::Session(SessionEvent::Expired) => {
                        if inner.is_current(id)
                            && *inner.state.borrow() != ConnectionState::Shutdown
                        {
                            warn!(session = id.0, "session expired; new identity required");
                            inner.lock_session().take();
                            inner.state.send_replace(ConnectionState::SessionExpired);
                            // Expiry deleted this session's ephemerals and
                            // its watches died with it, so no deletion
                            // events will arrive. Observers must assume
                            // the worst.
                            inner.observers.signal_state_unknown();
                            Inner::trigger_reconnect(&inner);
                        }
                        break;
                    }
                    StoreEvent::Session(SessionEvent::Closed) => break,
                    StoreEvent::Watch(event) => {
                        inner.note_watch_fired(&event);
                        // Invalidate before observers run so re-reads miss.
                        inner.cache.remove(&event.path);
                        inner.observers.dispatch(&event);
                    }
                }
            }
            debug!(session = id.0, "event pump finished");
        });
    }

    /// A fired watch registration is spent; drop it from the tables.
    fn note_watch_fired(&self, event: &WatchedEvent) {
        let mut watches = self.lock_watches();
        match event.kind {
            EventKind::NodeCreated | EventKind::NodeDataChanged => {
                watches.data.remove(&event.path);
            }
            EventKind::NodeChildrenChanged => {
                watches.children.remove(&event.path);
            }
            EventKind::NodeDeleted => {
                watches.data.remove(&event.path);
                watches.children.remove(&event.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NullPathCache;
    use zk_coord_store::MemoryStore;

    async fn client_for(store: &MemoryStore) -> ResilientClient {
        ResilientClient::connect(
            Arc::new(store.clone()),
            ClientConfig::default(),
            Arc::new(NullPathCache::new()),
            Arc::new(ObserverManager::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn basic_operations_round_trip() {
        let store = MemoryStore::new();
        let client = client_for(&store).await;

        let path = client
            .create("/app", b"v0", CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(path, "/app");
        let (data, stat) = client.get_data("/app", false).await.unwrap();
        assert_eq!(data, b"v0");
        assert_eq!(stat.version, 0);

        client.set_data("/app", b"v1", 0).await.unwrap();
        let (data, stat) = client.get_data("/app", false).await.unwrap();
        assert_eq!(data, b"v1");
        assert_eq!(stat.version, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let client = client_for(&store).await;
        client
            .create("/gone", b"", CreateMode::Persistent)
            .await
            .unwrap();
        client.delete("/gone", -1).await.unwrap();
        // Second delete of the absent node is treated as success.
        client.delete("/gone", -1).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let store = MemoryStore::new();
        let client = client_for(&store).await;
        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Shutdown);

        let err = client.exists("/x", false).await.unwrap_err();
        assert!(matches!(err, CoordError::Shutdown));
    }

    #[tokio::test]
    async fn state_is_recorded_without_subscribers() {
        let store = MemoryStore::new();
        let client = client_for(&store).await;
        // No receiver is parked on the state channel at any point here;
        // transitions must land in the channel value regardless.
        assert_eq!(client.state(), ConnectionState::Connected);

        let old_session = client.session_id().unwrap();
        store.expire_session(old_session);
        let start = std::time::Instant::now();
        while client.session_id() == Some(old_session)
            || client.state() != ConnectionState::Connected
        {
            assert!(start.elapsed() < Duration::from_secs(2), "no re-connection");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Shutdown);
    }

    #[tokio::test]
    async fn fail_fast_backoff_refuses_to_wait() {
        let store = MemoryStore::new();
        store.set_connectable(false);
        let result = ResilientClient::connect(
            Arc::new(store.clone()),
            ClientConfig {
                backoff: BackoffPolicy::FailFast,
                ..ClientConfig::default()
            },
            Arc::new(NullPathCache::new()),
            Arc::new(ObserverManager::new()),
        )
        .await;
        assert!(matches!(result, Err(CoordError::Connection(_))));
    }
}
