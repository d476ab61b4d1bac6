//! In-process TTL+LRU cache shared by stage handlers for external lookups
//! (artist search, track search, producer credits) that are expensive or
//! rate-limited to repeat.

use crate::clock::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Keys are namespaced so one cache instance can serve several unrelated
/// lookup kinds (`search`, `song`, `artist`, ...) without key collisions and
/// without needing one `Cache` per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheNamespace(pub &'static str);

impl CacheNamespace {
    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.0, key)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub key_count: usize,
    pub byte_size: usize,
}

struct Entry<V> {
    value: V,
    inserted_at_millis: u64,
    last_access_seq: u64,
    byte_size: usize,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    access_seq: u64,
    hits: u64,
    misses: u64,
}

/// Estimate the byte footprint of a cached value for stats purposes.
pub trait ApproxSize {
    fn approx_size(&self) -> usize;
}

/// Stage handlers cache `serde_json::Value` responses from Spotify/Genius, so
/// this is the impl that actually backs `CacheStats.byte_size` in production:
/// its serialized length, not `size_of::<Value>()`, which is a near-constant
/// regardless of how much JSON is cached.
impl ApproxSize for serde_json::Value {
    fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

impl ApproxSize for String {
    fn approx_size(&self) -> usize {
        self.len()
    }
}

impl ApproxSize for u32 {
    fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<V> Cache<V>
where
    V: Clone + ApproxSize + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                access_seq: 0,
                hits: 0,
                misses: 0,
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub async fn get(&self, namespace: CacheNamespace, key: &str) -> Option<V> {
        let full_key = namespace.prefixed(key);
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().await;
        inner.access_seq += 1;
        let seq = inner.access_seq;

        let expired = inner
            .entries
            .get(&full_key)
            .map(|e| now.saturating_sub(e.inserted_at_millis) > self.config.ttl.as_millis() as u64)
            .unwrap_or(false);

        if expired {
            inner.entries.remove(&full_key);
        }

        match inner.entries.get_mut(&full_key) {
            Some(entry) => {
                entry.last_access_seq = seq;
                inner.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Returns the value even if past TTL, without counting toward hit/miss
    /// stats. Used for stale-on-error fallback when a refetch fails.
    async fn get_stale(&self, namespace: CacheNamespace, key: &str) -> Option<V> {
        let full_key = namespace.prefixed(key);
        let inner = self.inner.lock().await;
        inner.entries.get(&full_key).map(|e| e.value.clone())
    }

    pub async fn set(&self, namespace: CacheNamespace, key: &str, value: V) {
        let full_key = namespace.prefixed(key);
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().await;
        inner.access_seq += 1;
        let seq = inner.access_seq;
        let byte_size = value.approx_size();

        inner.entries.insert(
            full_key,
            Entry { value, inserted_at_millis: now, last_access_seq: seq, byte_size },
        );

        if inner.entries.len() > self.config.max_entries {
            Self::evict_lru(&mut inner);
        }
    }

    fn evict_lru(inner: &mut Inner<V>) {
        let evict_count = (inner.entries.len() as f64 * 0.10).ceil() as usize;
        if evict_count == 0 {
            return;
        }
        let mut by_age: Vec<(String, u64)> =
            inner.entries.iter().map(|(k, e)| (k.clone(), e.last_access_seq)).collect();
        by_age.sort_by_key(|(_, seq)| *seq);
        for (key, _) in by_age.into_iter().take(evict_count) {
            inner.entries.remove(&key);
        }
    }

    /// Look up `key`; on miss, invoke `fetch` and cache the result. If
    /// `fetch` fails, fall back to a stale (past-TTL) cached value when one
    /// exists rather than propagating the error.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(namespace, key).await {
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                self.set(namespace, key, value.clone()).await;
                Ok(value)
            }
            Err(err) => match self.get_stale(namespace, key).await {
                Some(stale) => {
                    tracing::warn!(namespace = namespace.0, key, "cache: serving stale value after fetch error");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    pub async fn sweep(&self) {
        let now = self.clock.now_millis();
        let ttl_millis = self.config.ttl.as_millis() as u64;
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .retain(|_, entry| now.saturating_sub(entry.inserted_at_millis) <= ttl_millis);
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            key_count: inner.entries.len(),
            byte_size: inner.entries.values().map(|e| e.byte_size).sum(),
        }
    }

    pub async fn invalidate(&self, namespace: CacheNamespace, key: &str) {
        let full_key = namespace.prefixed(key);
        self.inner.lock().await.entries.remove(&full_key);
    }
}

/// Spawn a background task that calls `sweep` on `cache` every
/// `config.sweep_interval` until the returned handle is dropped/aborted.
pub fn spawn_sweeper<V>(cache: Arc<Cache<V>>) -> tokio::task::JoinHandle<()>
where
    V: Clone + ApproxSize + Send + Sync + 'static,
{
    let interval = cache.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep().await;
        }
    })
}
