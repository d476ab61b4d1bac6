//! Per-resource circuit breaker registry. A worker process touches many
//! independent external resources (the Spotify API, the Genius API, token
//! refresh endpoints, each queue) and needs one breaker per resource name
//! rather than a single global one, so a Genius outage doesn't trip the
//! Spotify breaker.

use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitBreakerSnapshot, CircuitBreakerStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-name construction overrides. Left fields fall back to the registry's
/// resource-name-sensitive defaults (see [`CircuitBreakerRegistry::default_for`]).
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistryOptions {
    pub failure_threshold: Option<usize>,
    pub recovery_timeout: Option<Duration>,
}

pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreakerPolicy>>,
    store: Option<Arc<dyn CircuitBreakerStore>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self { breakers: Mutex::new(HashMap::new()), store: None }
    }

    pub fn with_store(store: Arc<dyn CircuitBreakerStore>) -> Self {
        Self { breakers: Mutex::new(HashMap::new()), store: Some(store) }
    }

    /// Resource-name-sensitive defaults: rate-limit-adjacent circuits trip
    /// faster and stay open longer than general API circuits, and
    /// token-refresh circuits use a much longer reset window since a token
    /// endpoint outage is rarely transient on a short timescale.
    fn default_for(name: &str) -> (usize, Duration) {
        if name.contains("token-refresh") {
            (3, Duration::from_secs(3600))
        } else if name.contains("rate-limit") || name.starts_with("ratelimit") {
            (2, Duration::from_secs(120))
        } else {
            (5, Duration::from_secs(30))
        }
    }

    pub async fn get_or_create(
        &self,
        name: impl Into<String>,
        opts: CircuitBreakerRegistryOptions,
    ) -> CircuitBreakerPolicy {
        let name = name.into();
        let mut breakers = self.breakers.lock().await;

        if let Some(existing) = breakers.get(&name) {
            return existing.clone();
        }

        let (default_threshold, default_timeout) = Self::default_for(&name);
        let mut policy = CircuitBreakerPolicy::new(
            opts.failure_threshold.unwrap_or(default_threshold),
            opts.recovery_timeout.unwrap_or(default_timeout),
        )
        .with_name(name.clone());

        if let Some(store) = &self.store {
            policy = policy.with_store(store.clone());
            policy.sync_from_storage().await;
        }

        breakers.insert(name, policy.clone());
        policy
    }

    /// Reset every breaker whose name starts with `prefix` back to closed.
    /// Used by the admin health endpoint to clear a circuit an operator has
    /// confirmed is healthy again.
    pub async fn reset_endpoint_circuits(&self, prefix: &str) {
        let breakers = self.breakers.lock().await;
        for (name, breaker) in breakers.iter() {
            if name.starts_with(prefix) {
                breaker.reset();
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers = self.breakers.lock().await;
        breakers.values().map(|b| b.snapshot()).collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_existing_breaker_for_same_name() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry
            .get_or_create("spotify-api", CircuitBreakerRegistryOptions::default())
            .await;
        let b = registry
            .get_or_create("spotify-api", CircuitBreakerRegistryOptions::default())
            .await;

        // Tripping `a` should be visible through `b` since they share state.
        let _ = a
            .execute(|| async {
                Err::<(), crate::ResilienceError<std::io::Error>>(crate::ResilienceError::Inner(
                    std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                ))
            })
            .await;
        assert_eq!(a.state(), b.state());
    }

    #[tokio::test]
    async fn token_refresh_resources_get_long_reset_window() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry
            .get_or_create("token-refresh", CircuitBreakerRegistryOptions::default())
            .await;
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.effective_reset_timeout_millis, 3_600_000);
    }

    #[tokio::test]
    async fn explicit_options_override_resource_defaults() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry
            .get_or_create(
                "token-refresh",
                CircuitBreakerRegistryOptions {
                    failure_threshold: Some(1),
                    recovery_timeout: Some(Duration::from_secs(5)),
                },
            )
            .await;
        assert_eq!(breaker.snapshot().effective_reset_timeout_millis, 5_000);
    }

    #[tokio::test]
    async fn reset_endpoint_circuits_only_touches_matching_prefix() {
        let registry = CircuitBreakerRegistry::new();
        let spotify = registry
            .get_or_create("spotify-search", CircuitBreakerRegistryOptions::default())
            .await;
        let genius = registry
            .get_or_create("genius-search", CircuitBreakerRegistryOptions::default())
            .await;

        for breaker in [&spotify, &genius] {
            for _ in 0..10 {
                let _ = breaker
                    .execute(|| async {
                        Err::<(), crate::ResilienceError<std::io::Error>>(crate::ResilienceError::Inner(
                            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                        ))
                    })
                    .await;
            }
        }

        registry.reset_endpoint_circuits("spotify").await;

        assert_eq!(spotify.state(), crate::CircuitState::Closed);
        assert_eq!(genius.state(), crate::CircuitState::Open);
    }
}
