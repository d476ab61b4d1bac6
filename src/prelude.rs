//! Convenient re-exports for the common resilience/shared-state types.
pub use crate::{
    backoff::{
        Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
        MAX_BACKOFF,
    },
    cache::{Cache, CacheConfig, CacheNamespace, CacheStats},
    circuit_breaker::{
        CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot, CircuitBreakerStore,
        CircuitState,
    },
    circuit_breaker_registry::{CircuitBreakerRegistry, CircuitBreakerRegistryOptions},
    clock::{Clock, MonotonicClock},
    config::{Config, Environment, StageId},
    error::{parse_retry_after, ErrorCategory, MAX_RETRY_AFTER, MAX_RETRY_FAILURES},
    jitter::Jitter,
    rate_limit::{InMemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimiter},
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    stack::{ResilienceStack, ResilienceStackBuilder},
    telemetry::{MemorySink, NullSink, PolicyEvent, TelemetrySink, TracingSink},
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
    BulkheadPolicy, ResilienceError,
};
