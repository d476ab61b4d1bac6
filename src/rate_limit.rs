//! Durable fixed-window rate limiter shared across worker invocations.
//!
//! Unlike the token-bucket primitives typically used for single-process
//! shaping, this limiter's counters are expected to live in shared storage
//! (`pipeline-db`'s Postgres-backed implementation) so every worker process
//! enforcing a limit on, say, the Spotify API sees the same window. The only
//! write paths are atomic increment/reset, matching the "shared mutable
//! breaker/limiter state" requirement that rules out read-then-write races.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix millis at which the current window resets.
    pub reset_at_millis: u64,
}

/// A rate-limit counter's raw state: count observed so far in the current
/// window, and when that window ends. Exposed so external [`RateLimitStore`]
/// implementations (e.g. `pipeline-db`'s Postgres-backed store) can construct
/// it from a fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u32,
    pub window_end_millis: u64,
}

/// Storage hook for the rate limiter's shared counters, keyed by an
/// application-chosen string (`spotify-api`, `genius-api:artist-search`, ...).
/// Implementations must make `increment` atomic: concurrent callers racing on
/// the same key must never both observe a stale count.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment the counter for `key`, creating a fresh window
    /// ending at `window_end_millis` if none exists or the existing one has
    /// expired. Returns the post-increment counter, or `None` on storage
    /// failure (the caller fails open).
    async fn increment(&self, key: &str, window_end_millis: u64) -> Option<WindowCounter>;

    /// Force a fresh window starting now, ending at `new_window_end_millis`.
    async fn reset(&self, key: &str, new_window_end_millis: u64);

    async fn peek(&self, key: &str) -> Option<WindowCounter>;
}

pub struct InMemoryRateLimitStore {
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self { counters: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment(&self, key: &str, window_end_millis: u64) -> Option<WindowCounter> {
        let mut counters = self.counters.lock().await;
        let now = now_millis();
        let entry = counters.entry(key.to_string()).or_insert(WindowCounter {
            count: 0,
            window_end_millis,
        });

        if entry.window_end_millis <= now {
            entry.count = 0;
            entry.window_end_millis = window_end_millis;
        }

        entry.count += 1;
        Some(*entry)
    }

    async fn reset(&self, key: &str, new_window_end_millis: u64) {
        let mut counters = self.counters.lock().await;
        counters.insert(key.to_string(), WindowCounter { count: 0, window_end_millis: new_window_end_millis });
    }

    async fn peek(&self, key: &str) -> Option<WindowCounter> {
        self.counters.lock().await.get(key).copied()
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Fixed-window check: `max_requests` per `window_ms`, widened
    /// geometrically (capped at a 2^5 multiplier) by `retry_count` so a
    /// caller backing off from repeated 429s pushes its own effective window
    /// out instead of hammering the limiter every `window_ms`.
    ///
    /// Fails open on storage error: an unreachable store must never block
    /// the pipeline outright.
    pub async fn can_proceed(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: u64,
        retry_count: u32,
    ) -> RateLimitDecision {
        let multiplier = 1u64 << retry_count.min(5);
        let adjusted_window_ms = window_ms.saturating_mul(multiplier);
        let window_end = now_millis() + adjusted_window_ms;

        match self.store.increment(key, window_end).await {
            Some(counter) => {
                let allowed = counter.count <= max_requests;
                let remaining = max_requests.saturating_sub(counter.count);
                RateLimitDecision { allowed, remaining, reset_at_millis: counter.window_end_millis }
            }
            None => {
                tracing::warn!(key, "rate limiter: storage unavailable, failing open");
                RateLimitDecision { allowed: true, remaining: max_requests, reset_at_millis: window_end }
            }
        }
    }

    pub async fn reset(&self, key: &str, new_window_ms: u64) {
        self.store.reset(key, now_millis() + new_window_ms).await;
    }

    pub async fn get_remaining_capacity(&self, key: &str, max_requests: u32) -> u32 {
        match self.store.peek(key).await {
            Some(counter) if counter.window_end_millis > now_millis() => {
                max_requests.saturating_sub(counter.count)
            }
            _ => max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()));
        for _ in 0..5 {
            let decision = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
            assert!(decision.allowed);
        }
    }

    #[tokio::test]
    async fn rejects_once_over_the_limit() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()));
        for _ in 0..5 {
            let _ = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        }
        let sixth = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn separate_keys_have_independent_windows() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()));
        for _ in 0..5 {
            let _ = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        }
        let other = limiter.can_proceed("genius-api", 5, 60_000, 0).await;
        assert!(other.allowed);
    }

    #[tokio::test]
    async fn retry_count_widens_the_window() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()));
        let base = limiter.can_proceed("spotify-api", 5, 1_000, 0).await;
        let widened = limiter.can_proceed("spotify-api", 5, 1_000, 3).await;
        assert!(widened.reset_at_millis > base.reset_at_millis);
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()));
        for _ in 0..5 {
            let _ = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        }
        limiter.reset("spotify-api", 60_000).await;
        let decision = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        assert!(decision.allowed);
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn increment(&self, _key: &str, _window_end_millis: u64) -> Option<WindowCounter> {
            None
        }
        async fn reset(&self, _key: &str, _new_window_end_millis: u64) {}
        async fn peek(&self, _key: &str) -> Option<WindowCounter> {
            None
        }
    }

    #[tokio::test]
    async fn fails_open_when_storage_unavailable() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let decision = limiter.can_proceed("spotify-api", 5, 60_000, 0).await;
        assert!(decision.allowed);
    }
}
