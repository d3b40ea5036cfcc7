//! Provider facade: one configured connection, locks by name.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use zk_coord_client::{
    ClientConfig, NullPathCache, ObserverManager, PathCache, ResilientClient, ShardedPathCache,
};
use zk_coord_core::backoff::BackoffPolicy;
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_core::traits::{LockProvider, ReaderWriterLockProvider, SemaphoreProvider};
use zk_coord_store::session::StoreConnector;

use crate::lock::ZkDistributedLock;
use crate::paths::EntityPathBuilder;
use crate::permit::{ConfiguredPermitPoolSize, FixedPermitPoolSize, PermitPoolSize};
use crate::reentrant::ReentrantZkLock;
use crate::reservation::ReservationManager;
use crate::rw_lock::ZkReaderWriterLock;
use crate::semaphore::ZkSemaphore;

/// Coordination-store provider implementing the lock/rw-lock/semaphore
/// provider traits.
///
/// Encapsulates one resilient connection, its path cache and observer
/// registry, and the namespace tokens every entity path is built from.
///
/// # Example
///
/// ```rust,ignore
/// let provider = ZkCoordProvider::builder()
///     .connector(Arc::new(store))
///     .cluster_id("cluster-1")
///     .build()
///     .await?;
/// let lock = provider.create_lock("orders");
/// let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
/// ```
pub struct ZkCoordProvider {
    client: Arc<ResilientClient>,
    manager: Arc<ReservationManager>,
    paths: EntityPathBuilder,
}

impl ZkCoordProvider {
    pub fn builder() -> ZkCoordProviderBuilder {
        ZkCoordProviderBuilder::default()
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    /// Creates a reentrant lock with the given name.
    pub fn create_reentrant_lock(&self, name: &str) -> ReentrantZkLock {
        ReentrantZkLock::new(ZkDistributedLock::new(
            name,
            self.manager.clone(),
            self.paths.clone(),
        ))
    }

    /// Creates a semaphore whose bound comes from a caller-supplied pool.
    pub fn create_semaphore_with_pool(
        &self,
        name: &str,
        pool: Arc<dyn PermitPoolSize>,
    ) -> ZkSemaphore {
        ZkSemaphore::new(name, self.manager.clone(), self.paths.clone(), pool)
    }

    /// Creates a semaphore whose bound follows the configuration node at
    /// `config_path`, created with `default_permits` when absent.
    pub async fn create_observed_semaphore(
        &self,
        name: &str,
        config_path: &str,
        default_permits: u32,
    ) -> CoordResult<ZkSemaphore> {
        let pool =
            ConfiguredPermitPoolSize::load(self.client.clone(), config_path, default_permits)
                .await?;
        Ok(self.create_semaphore_with_pool(name, Arc::new(pool)))
    }

    /// Shuts down the underlying connection; terminal.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

impl LockProvider for ZkCoordProvider {
    type Lock = ZkDistributedLock;

    fn create_lock(&self, name: &str) -> Self::Lock {
        ZkDistributedLock::new(name, self.manager.clone(), self.paths.clone())
    }
}

impl ReaderWriterLockProvider for ZkCoordProvider {
    type Lock = ZkReaderWriterLock;

    fn create_reader_writer_lock(&self, name: &str) -> Self::Lock {
        ZkReaderWriterLock::new(name, self.manager.clone(), self.paths.clone())
    }
}

impl SemaphoreProvider for ZkCoordProvider {
    type Semaphore = ZkSemaphore;

    fn create_semaphore(&self, name: &str, permits: u32) -> Self::Semaphore {
        self.create_semaphore_with_pool(name, Arc::new(FixedPermitPoolSize::new(permits)))
    }
}

/// Builder for [`ZkCoordProvider`].
pub struct ZkCoordProviderBuilder {
    connector: Option<Arc<dyn StoreConnector>>,
    base_path: String,
    path_context: String,
    cluster_id: String,
    backoff: BackoffPolicy,
    assume_error_timeout: Duration,
    cache_capacity: Option<usize>,
    cache_shards: usize,
    cache_disabled: bool,
}

impl Default for ZkCoordProviderBuilder {
    fn default() -> Self {
        Self {
            connector: None,
            base_path: "/apps".to_string(),
            path_context: "default".to_string(),
            cluster_id: "default".to_string(),
            backoff: BackoffPolicy::default(),
            assume_error_timeout: Duration::from_secs(10),
            cache_capacity: None,
            cache_shards: 16,
            cache_disabled: false,
        }
    }
}

impl ZkCoordProviderBuilder {
    /// The store to connect to. Required.
    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.to_string();
        self
    }

    pub fn path_context(mut self, path_context: &str) -> Self {
        self.path_context = path_context.to_string();
        self
    }

    pub fn cluster_id(mut self, cluster_id: &str) -> Self {
        self.cluster_id = cluster_id.to_string();
        self
    }

    /// Backoff policy governing reconnects and per-operation retries.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// How long a retried operation waits for re-connection before a
    /// fresh reconnect is forced.
    pub fn assume_error_timeout(mut self, timeout: Duration) -> Self {
        self.assume_error_timeout = timeout;
        self
    }

    /// Bounds the path cache; unbounded when not set.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn cache_shards(mut self, shards: usize) -> Self {
        self.cache_shards = shards;
        self
    }

    /// Disables the path cache entirely.
    pub fn disable_cache(mut self) -> Self {
        self.cache_disabled = true;
        self
    }

    /// Connects and builds the provider.
    pub async fn build(self) -> CoordResult<ZkCoordProvider> {
        let connector = self
            .connector
            .ok_or_else(|| CoordError::Config("no store connector configured".to_string()))?;
        let paths = EntityPathBuilder::new(&self.base_path, &self.path_context, &self.cluster_id)?;
        let cache: Arc<dyn PathCache> = if self.cache_disabled {
            Arc::new(NullPathCache::new())
        } else {
            Arc::new(ShardedPathCache::new(self.cache_capacity, self.cache_shards))
        };
        let observers = Arc::new(ObserverManager::new());
        let client = Arc::new(
            ResilientClient::connect(
                connector,
                ClientConfig {
                    backoff: self.backoff,
                    assume_error_timeout: self.assume_error_timeout,
                },
                cache,
                observers,
            )
            .await?,
        );
        let manager = ReservationManager::new(client.clone());
        info!(
            base = %self.base_path,
            context = %self.path_context,
            cluster = %self.cluster_id,
            "coordination provider ready"
        );
        Ok(ZkCoordProvider {
            client,
            manager,
            paths,
        })
    }
}
