#![forbid(unsafe_code)]

//! Resilience and shared-state primitives backing the artist/album/track/producer
//! enrichment pipeline: retry policies, circuit breakers, bulkheads, timeouts, a
//! durable rate limiter, and a TTL+LRU cache.
//!
//! ## Features
//!
//! - **Retry policies** with backoff strategies (constant, linear, exponential) and
//!   category-aware, `Retry-After`-honoring delay overrides
//! - **Circuit breakers** with half-open probing, durable persistence, and a
//!   per-resource registry
//! - **Bulkheads** for concurrency limiting and resource isolation
//! - **Timeout policies** integrated with tokio
//! - **Rate limiting** with a pluggable durable store and fail-open semantics
//! - **Cache** with TTL expiry, LRU eviction, and stale-on-error fallback
//! - **Policy composition** via builder pattern
//! - **Lock-free implementations** using atomics
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pipeline_core::{
//!     Backoff, BulkheadPolicy, CircuitBreakerPolicy, Jitter, ResilienceError, ResilienceStack,
//!     ResilienceStackBuilder, RetryPolicy, TimeoutPolicy,
//! };
//!
//! async fn flaky_operation(
//!     attempts: Arc<AtomicUsize>,
//! ) -> Result<(), ResilienceError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(ResilienceError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResilienceError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     // Compose via the stack builder (Retry → CircuitBreaker → Bulkhead → Timeout).
//!     let stack: ResilienceStack<std::io::Error> = ResilienceStackBuilder::new()
//!         .retry(
//!             RetryPolicy::builder()
//!                 .max_attempts(3)
//!                 .unwrap()
//!                 .backoff(Backoff::exponential(Duration::from_millis(200)))
//!                 .with_jitter(Jitter::full())
//!                 .build(),
//!         )
//!         .circuit_breaker(5, Duration::from_secs(30))
//!         .bulkhead(32)
//!         .timeout(Duration::from_secs(2))
//!         .unwrap()
//!         .build();
//!
//!     stack.execute(|| flaky_operation(attempts.clone())).await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod bulkhead;
mod cache;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
pub mod config;
mod error;
mod jitter;
pub mod rate_limit;
mod retry;
mod sleeper;
mod stack;
mod telemetry;
mod timeout;

// Re-exports
pub use backoff::{
    Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
    MAX_BACKOFF,
};
pub use bulkhead::{BulkheadError, BulkheadPolicy};
pub use cache::{Cache, CacheConfig, CacheNamespace, CacheStats};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot, CircuitBreakerStore,
    CircuitState,
};
pub use circuit_breaker_registry::{CircuitBreakerRegistry, CircuitBreakerRegistryOptions};
pub use clock::{Clock, MonotonicClock};
pub use error::{parse_retry_after, ErrorCategory, ResilienceError, MAX_RETRY_AFTER, MAX_RETRY_FAILURES};
pub use jitter::Jitter;
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimiter, WindowCounter,
};
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use telemetry::{MemorySink, NullSink, PolicyEvent, TelemetrySink, TracingSink};
#[cfg(feature = "telemetry-json")]
pub use telemetry::JsonSink;
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
