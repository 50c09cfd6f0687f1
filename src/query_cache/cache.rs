use crate::domain_model::{QueryHash, QueryKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long data counts as fresh after it was written.
    pub stale_time: Duration,
    /// How long an entry without observers is kept.
    pub gc_time: Duration,
    /// Extra attempts `fetch_query` makes after a failed fetch.
    pub retry: u32,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            stale_time: Duration::from_secs(5 * 60),
            gc_time: Duration::from_secs(10 * 60),
            retry: 2,
        }
    }
}

impl CacheOptions {
    pub fn entry(&self) -> EntryOptions {
        EntryOptions {
            stale_time: self.stale_time,
            gc_time: self.gc_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
}

struct CacheEntry {
    key: QueryKey,
    data: Option<Value>,
    updated_at: Option<Instant>,
    updated_at_wall: Option<DateTime<Utc>>,
    options: EntryOptions,
    observers: usize,
    inactive_since: Option<Instant>,
    generation: u64,
    notify: watch::Sender<Option<Value>>,
}

impl CacheEntry {
    fn empty(key: QueryKey, options: EntryOptions, generation: u64, now: Instant) -> Self {
        let (notify, _) = watch::channel(None);
        CacheEntry {
            key,
            data: None,
            updated_at: None,
            updated_at_wall: None,
            options,
            observers: 0,
            inactive_since: Some(now),
            generation,
            notify,
        }
    }

    fn write(&mut self, data: Value, options: EntryOptions, now: Instant) {
        self.data = Some(data.clone());
        self.updated_at = Some(now);
        self.updated_at_wall = Some(Utc::now());
        self.options = options;
        if self.observers == 0 {
            self.inactive_since = Some(now);
        }
        self.notify.send_replace(Some(data));
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.updated_at {
            Some(at) => now.duration_since(at) >= self.options.stale_time,
            None => true,
        }
    }

    fn is_collectable(&self, now: Instant) -> bool {
        self.observers == 0
            && self
                .inactive_since
                .is_some_and(|since| now.duration_since(since) >= self.options.gc_time)
    }
}

/// Serialized form of one entry, shaped like a persisted react-query entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
    pub query_key: QueryKey,
    pub query_hash: QueryHash,
    pub state: PersistedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub data: Value,
    /// Milliseconds since the unix epoch.
    #[serde(default)]
    pub data_updated_at: i64,
    #[serde(default = "success_status")]
    pub status: String,
}

fn success_status() -> String {
    "success".to_string()
}

/// Key → data cache with staleness and garbage-collection windows.
///
/// One instance belongs to the application root and is shared by `Arc`.
pub struct QueryCache {
    entries: DashMap<QueryHash, CacheEntry>,
    options: CacheOptions,
    generations: AtomicU64,
}

impl QueryCache {
    pub fn new(options: CacheOptions) -> Self {
        QueryCache {
            entries: DashMap::new(),
            options,
            generations: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_if_collectable(&self, hash: &QueryHash, now: Instant) {
        if self
            .entries
            .remove_if(hash, |_, entry| entry.is_collectable(now))
            .is_some()
        {
            trace!(%hash, "evicted unused entry");
        }
    }

    /// Fresh data for `key`. Stale, missing and collected entries all read as
    /// `None`.
    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        let hash = key.hash();
        let now = Instant::now();
        self.evict_if_collectable(&hash, now);
        let entry = self.entries.get(&hash)?;
        if entry.is_stale(now) {
            return None;
        }
        entry.data.clone()
    }

    /// Data for `key` regardless of staleness.
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        let hash = key.hash();
        self.evict_if_collectable(&hash, Instant::now());
        self.entries.get(&hash)?.data.clone()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key = %key.hash(), "cached data has unexpected shape: {}", e);
                None
            }
        }
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let now = Instant::now();
        self.entries
            .get(&key.hash())
            .is_none_or(|entry| entry.is_stale(now))
    }

    pub fn set(&self, key: &QueryKey, data: Value) {
        self.set_with(key, data, self.options.entry());
    }

    pub fn set_as<T: Serialize>(&self, key: &QueryKey, data: &T) -> serde_json::Result<()> {
        self.set(key, serde_json::to_value(data)?);
        Ok(())
    }

    /// Overwrites the entry and resets its fetch timestamp.
    pub fn set_with(&self, key: &QueryKey, data: Value, options: EntryOptions) {
        let now = Instant::now();
        let hash = key.hash();
        debug!(key = %hash, "cache write");
        let mut entry = self.entries.entry(hash).or_insert_with(|| {
            CacheEntry::empty(key.clone(), options, self.next_generation(), now)
        });
        entry.write(data, options, now);
    }

    pub fn remove(&self, key: &QueryKey) {
        if let Some((_, entry)) = self.entries.remove(&key.hash()) {
            entry.notify.send_replace(None);
        }
    }

    /// Drops every entry. Observers of dropped entries are detached.
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.notify.send_replace(None);
        }
        self.entries.clear();
        debug!("cache cleared");
    }

    /// Registers an observer for `key`, creating an empty entry if needed. The
    /// entry is kept alive until the last observer is dropped.
    pub fn subscribe(self: &Arc<Self>, key: &QueryKey) -> CacheObserver {
        let now = Instant::now();
        let hash = key.hash();
        let mut entry = self.entries.entry(hash.clone()).or_insert_with(|| {
            CacheEntry::empty(key.clone(), self.options.entry(), self.next_generation(), now)
        });
        entry.observers += 1;
        entry.inactive_since = None;

        CacheObserver {
            cache: Arc::downgrade(self),
            hash,
            generation: entry.generation,
            receiver: entry.notify.subscribe(),
        }
    }

    fn release_observer(&self, hash: &QueryHash, generation: u64) {
        if let Some(mut entry) = self.entries.get_mut(hash) {
            if entry.generation != generation {
                return;
            }
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.inactive_since = Some(Instant::now());
            }
        }
    }

    /// Removes inactive entries past their GC window. Returns how many went.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_collectable(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "garbage collected cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns fresh data for `key`, fetching and caching it when missing or
    /// stale. Failed fetches are retried `retry` times with exponential
    /// backoff.
    pub async fn fetch_query<F, Fut, E>(&self, key: &QueryKey, fetcher: F) -> Result<Value, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        self.fetch_query_with(key, self.options.entry(), fetcher).await
    }

    pub async fn fetch_query_with<F, Fut, E>(
        &self,
        key: &QueryKey,
        options: EntryOptions,
        mut fetcher: F,
    ) -> Result<Value, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        if let Some(data) = self.get(key) {
            return Ok(data);
        }

        let mut attempt = 0;
        loop {
            match fetcher().await {
                Ok(data) => {
                    self.set_with(key, data.clone(), options);
                    return Ok(data);
                }
                Err(e) if attempt < self.options.retry => {
                    let delay = retry_delay(attempt);
                    warn!(key = %key.hash(), attempt, ?delay, "fetch failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn snapshot(&self) -> Vec<PersistedQuery> {
        self.entries
            .iter()
            .filter_map(|item| {
                let entry = item.value();
                let data = entry.data.clone()?;
                Some(PersistedQuery {
                    query_key: entry.key.clone(),
                    query_hash: entry.key.hash(),
                    state: PersistedState {
                        data,
                        data_updated_at: entry
                            .updated_at_wall
                            .map(|at| at.timestamp_millis())
                            .unwrap_or_default(),
                        status: success_status(),
                    },
                })
            })
            .collect()
    }

    /// Writes every persisted entry back with `set`; restored entries start
    /// fresh.
    pub fn restore(&self, queries: Vec<PersistedQuery>) -> usize {
        let count = queries.len();
        for query in queries {
            self.set(&query.query_key, query.state.data);
        }
        count
    }

    /// Periodically collects garbage until `cancel` fires.
    pub async fn run_gc(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.collect_garbage();
                }
            }
        }
        debug!("cache gc stopped");
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(millis).min(MAX_RETRY_DELAY)
}

/// Live view on one cache entry.
///
/// Dropping the last observer of an entry starts its GC window.
pub struct CacheObserver {
    cache: Weak<QueryCache>,
    hash: QueryHash,
    generation: u64,
    receiver: watch::Receiver<Option<Value>>,
}

impl CacheObserver {
    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next write. Returns `None` once the entry has been removed
    /// from the cache; subscribe again to follow its replacement.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

impl Drop for CacheObserver {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.release_observer(&self.hash, self.generation);
        }
    }
}
