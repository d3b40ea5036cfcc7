//! Live permit pool bounds for semaphores.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use zk_coord_client::{PathObserver, ResilientClient};
use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_store::types::{CreateMode, WatchedEvent};

/// Supplies the current capacity bound of a semaphore.
///
/// The bound is live: raising it admits waiting reservations ranked below
/// the new value without recreating their nodes; lowering it never evicts
/// existing holders.
pub trait PermitPoolSize: Send + Sync {
    /// The current bound.
    fn permits(&self) -> u32;

    /// A receiver that changes whenever the bound changes, so waiters can
    /// re-evaluate eligibility.
    fn subscribe(&self) -> watch::Receiver<u32>;
}

/// A constant bound.
pub struct FixedPermitPoolSize {
    tx: watch::Sender<u32>,
}

impl FixedPermitPoolSize {
    pub fn new(permits: u32) -> Self {
        let (tx, _) = watch::channel(permits);
        Self { tx }
    }
}

impl PermitPoolSize for FixedPermitPoolSize {
    fn permits(&self) -> u32 {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<u32> {
        self.tx.subscribe()
    }
}

/// Serialized form of the semaphore configuration record. The value is
/// string-encoded for compatibility with the configuration service.
#[derive(Debug, Serialize, Deserialize)]
struct PermitPoolRecord {
    #[serde(rename = "permitPoolSize")]
    permit_pool_size: String,
}

/// Writes the configuration record that [`ConfiguredPermitPoolSize`]
/// observes. The node is created if absent.
pub async fn write_pool_size(
    client: &ResilientClient,
    config_path: &str,
    permits: u32,
) -> CoordResult<()> {
    let record = PermitPoolRecord {
        permit_pool_size: permits.to_string(),
    };
    let data = serde_json::to_vec(&record)
        .map_err(|e| CoordError::Config(format!("serialize permit pool record: {e}")))?;
    match client.set_data(config_path, &data, -1).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_no_node() => {
            ensure_parents(client, config_path).await?;
            match client.create(config_path, &data, CreateMode::Persistent).await {
                Ok(_) => Ok(()),
                // Lost the creation race; overwrite with our value.
                Err(e) if e.is_node_exists() => {
                    client.set_data(config_path, &data, -1).await.map(|_| ())
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn ensure_parents(client: &ResilientClient, path: &str) -> CoordResult<()> {
    let Some(parent) = zk_coord_store::paths::parent_of(path) else {
        return Ok(());
    };
    let mut built = String::with_capacity(parent.len());
    for segment in parent.split('/').filter(|s| !s.is_empty()) {
        built.push('/');
        built.push_str(segment);
        match client.create(&built, &[], CreateMode::Persistent).await {
            Ok(_) => {}
            Err(e) if e.is_node_exists() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

struct ConfiguredInner {
    client: Arc<ResilientClient>,
    config_path: String,
    tx: watch::Sender<u32>,
}

impl ConfiguredInner {
    /// Re-reads the configuration node and re-arms its data watch.
    async fn refresh(&self) -> CoordResult<()> {
        let (data, _stat) = self.client.get_data(&self.config_path, true).await?;
        let record: PermitPoolRecord = serde_json::from_slice(&data)
            .map_err(|e| CoordError::Config(format!("malformed permit pool record: {e}")))?;
        let permits: u32 = record
            .permit_pool_size
            .parse()
            .map_err(|e| CoordError::Config(format!("malformed permit pool size: {e}")))?;
        self.tx.send_if_modified(|current| {
            if *current != permits {
                debug!(path = %self.config_path, permits, "permit pool size changed");
                *current = permits;
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

struct ConfigObserver {
    inner: Weak<ConfiguredInner>,
}

impl PathObserver for ConfigObserver {
    fn on_event(&self, _event: &WatchedEvent) {
        if let Some(inner) = self.inner.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = inner.refresh().await {
                    warn!(path = %inner.config_path, error = %e, "permit pool refresh failed");
                }
            });
        }
    }

    fn on_state_unknown(&self) {
        // Configuration root vanished; the last known bound stands.
    }
}

/// A bound backed by an observable configuration node storing
/// `{"permitPoolSize": "<int>"}`.
///
/// Data-change watches keep the value current; every update is pushed to
/// subscribers so waiting semaphore reservations re-evaluate without
/// recreating their nodes.
pub struct ConfiguredPermitPoolSize {
    inner: Arc<ConfiguredInner>,
}

impl ConfiguredPermitPoolSize {
    /// Loads the bound from `config_path`, creating the node with
    /// `default_permits` when absent, and starts observing it.
    pub async fn load(
        client: Arc<ResilientClient>,
        config_path: &str,
        default_permits: u32,
    ) -> CoordResult<Self> {
        if client.exists(config_path, false).await?.is_none() {
            write_pool_size(&client, config_path, default_permits).await?;
        }
        let (tx, _) = watch::channel(default_permits);
        let inner = Arc::new(ConfiguredInner {
            client: client.clone(),
            config_path: config_path.to_string(),
            tx,
        });
        client.observers().register(
            config_path,
            Arc::new(ConfigObserver {
                inner: Arc::downgrade(&inner),
            }),
        );
        inner.refresh().await?;
        Ok(Self { inner })
    }

    pub fn config_path(&self) -> &str {
        &self.inner.config_path
    }
}

impl PermitPoolSize for ConfiguredPermitPoolSize {
    fn permits(&self) -> u32 {
        *self.inner.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<u32> {
        self.inner.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pool_reports_constant_bound() {
        let pool = FixedPermitPoolSize::new(3);
        assert_eq!(pool.permits(), 3);
        assert_eq!(*pool.subscribe().borrow(), 3);
    }

    #[test]
    fn record_round_trips_string_encoded() {
        let json = br#"{"permitPoolSize": "7"}"#;
        let record: PermitPoolRecord = serde_json::from_slice(json).unwrap();
        assert_eq!(record.permit_pool_size, "7");
        let out = serde_json::to_string(&PermitPoolRecord {
            permit_pool_size: "7".to_string(),
        })
        .unwrap();
        assert!(out.contains("permitPoolSize"));
    }
}
