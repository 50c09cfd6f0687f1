use super::{PersistedQuery, QueryCache};
use crate::domain_port::{DurableStorage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const CACHE_STORAGE_KEY: &str = "react-query-cache";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cache snapshot is not valid json: {0}")]
    Format(#[from] serde_json::Error),
}

/// Copies the cache to durable storage on a timer and back on startup.
pub struct CachePersister {
    cache: Arc<QueryCache>,
    storage: Arc<dyn DurableStorage>,
    interval: Duration,
}

impl CachePersister {
    pub fn new(cache: Arc<QueryCache>, storage: Arc<dyn DurableStorage>, interval: Duration) -> Self {
        CachePersister {
            cache,
            storage,
            interval,
        }
    }

    /// Repopulates the cache from storage. Returns the number of entries read.
    pub async fn restore(&self) -> Result<usize, PersistError> {
        let Some(raw) = self.storage.get_item(CACHE_STORAGE_KEY).await? else {
            debug!(key = CACHE_STORAGE_KEY, "no persisted cache");
            return Ok(0);
        };
        let queries: Vec<PersistedQuery> = serde_json::from_str(&raw)?;
        let restored = self.cache.restore(queries);
        info!(restored, "restored persisted cache");
        Ok(restored)
    }

    pub async fn flush(&self) -> Result<usize, PersistError> {
        let snapshot = self.cache.snapshot();
        let raw = serde_json::to_string(&snapshot)?;
        self.storage.set_item(CACHE_STORAGE_KEY, &raw).await?;
        debug!(entries = snapshot.len(), "persisted cache");
        Ok(snapshot.len())
    }

    /// Flushes on every tick until `cancel` fires, then flushes once more.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately; the cache was just restored
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        error!("Failed to persist query cache: {}", e);
                    }
                }
            }
        }

        if let Err(e) = self.flush().await {
            error!("Failed to persist query cache on shutdown: {}", e);
        }
    }
}
