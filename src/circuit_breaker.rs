//! Circuit breaker implementation with lock-free atomics.
//!
//! States: closed (pass-through), open (fail fast), half-open (probe). State is
//! held in-memory via atomics for the hot path, and optionally mirrored to a
//! [`CircuitBreakerStore`] so multiple worker invocations share one logical
//! breaker per named resource (`queue-<name>`, `spotify-api`, `token-refresh`, ...).

use crate::clock::{Clock, MonotonicClock};
use crate::error::{parse_retry_after, MAX_RETRY_AFTER};
use crate::ResilienceError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state byte"),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
    /// Successes required while half-open before the breaker closes. Default 1.
    pub half_open_success_threshold: usize,
    /// Minimum spacing between probe attempts while half-open. Default 10s.
    pub min_probe_interval: Duration,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
            half_open_success_threshold: 1,
            min_probe_interval: Duration::from_secs(0),
        }
    }

    fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: 1,
            half_open_success_threshold: 1,
            min_probe_interval: Duration::from_secs(10),
        }
    }
}

/// A point-in-time snapshot of a breaker's durable row, as persisted in
/// `circuit_breakers` and mirrored in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub success_count: usize,
    pub last_failure_time_millis: Option<u64>,
    pub effective_reset_timeout_millis: u64,
}

/// Storage hook so circuit breaker state survives across worker invocations.
/// `pipeline-db` provides a Postgres-backed implementation; tests use an
/// in-memory fake.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    async fn load(&self, name: &str) -> Option<CircuitBreakerSnapshot>;
    async fn persist(&self, snapshot: CircuitBreakerSnapshot);
}

pub(crate) struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    success_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
    last_probe_at_millis: AtomicU64,
    effective_reset_timeout_millis: AtomicU64,
}

impl CircuitBreakerState {
    pub(crate) fn new(default_reset_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
            last_probe_at_millis: AtomicU64::new(0),
            effective_reset_timeout_millis: AtomicU64::new(default_reset_timeout.as_millis() as u64),
        }
    }

    pub(crate) fn current_state(&self) -> CircuitState {
        CircuitState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    name: Option<Arc<str>>,
    store: Option<Arc<dyn CircuitBreakerStore>>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        let config = CircuitBreakerConfig::new(failure_threshold, recovery_timeout);
        Self {
            state: Arc::new(CircuitBreakerState::new(config.recovery_timeout)),
            config,
            clock: Arc::new(MonotonicClock::default()),
            name: None,
            store: None,
        }
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::new(config.recovery_timeout)),
            config,
            clock: Arc::new(MonotonicClock::default()),
            name: None,
            store: None,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    pub fn with_half_open_success_threshold(mut self, threshold: usize) -> Self {
        self.config.half_open_success_threshold = threshold.max(1);
        self
    }

    pub fn with_min_probe_interval(mut self, interval: Duration) -> Self {
        self.config.min_probe_interval = interval;
        self
    }

    /// Name this breaker so it can be persisted and looked up by a
    /// [`CircuitBreakerStore`] (`queue-<name>`, `spotify-api`, ...).
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach durable storage. Every state transition is persisted best-effort:
    /// a storage error is logged, never propagated, so the in-memory breaker
    /// keeps working even if the store is briefly unavailable.
    pub fn with_store(mut self, store: Arc<dyn CircuitBreakerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pull the latest snapshot from storage into the in-memory atomics. Call
    /// once at worker startup (or per invocation) before `execute`.
    pub async fn sync_from_storage(&self) {
        let (Some(store), Some(name)) = (&self.store, &self.name) else {
            return;
        };
        if let Some(snapshot) = store.load(name).await {
            let raw = match snapshot.state {
                CircuitState::Closed => STATE_CLOSED,
                CircuitState::Open => STATE_OPEN,
                CircuitState::HalfOpen => STATE_HALF_OPEN,
            };
            self.state.state.store(raw, Ordering::Release);
            self.state
                .failure_count
                .store(snapshot.failure_count, Ordering::Release);
            self.state
                .success_count
                .store(snapshot.success_count, Ordering::Release);
            self.state
                .effective_reset_timeout_millis
                .store(snapshot.effective_reset_timeout_millis, Ordering::Release);
            if let Some(last_failure) = snapshot.last_failure_time_millis {
                self.state.opened_at_millis.store(last_failure, Ordering::Release);
            }
        }
    }

    /// Point-in-time snapshot of this breaker's state, for admin/health
    /// introspection or manual persistence outside the automatic hook.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            name: self.name.as_deref().unwrap_or("unnamed").to_string(),
            state: self.state.current_state(),
            failure_count: self.state.failure_count.load(Ordering::Acquire),
            success_count: self.state.success_count.load(Ordering::Acquire),
            last_failure_time_millis: {
                let v = self.state.opened_at_millis.load(Ordering::Acquire);
                if v == 0 {
                    None
                } else {
                    Some(v)
                }
            },
            effective_reset_timeout_millis: self
                .state
                .effective_reset_timeout_millis
                .load(Ordering::Acquire),
        }
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            store.persist(self.snapshot()).await;
        }
    }

    /// Record a failure observed from an HTTP response, honoring a `429`'s
    /// `Retry-After` header as the breaker's next reset timeout (capped at
    /// [`MAX_RETRY_AFTER`]), then apply the ordinary failure bookkeeping.
    pub async fn record_failure(&self, status: Option<u16>, retry_after_header: Option<&str>) {
        if status == Some(429) {
            if let Some(header) = retry_after_header {
                if let Some(delay) = parse_retry_after(header, SystemTime::now()) {
                    let capped = delay.min(MAX_RETRY_AFTER);
                    self.state
                        .effective_reset_timeout_millis
                        .store(capped.as_millis() as u64, Ordering::Release);
                }
            }
        }
        self.on_failure();
        self.persist().await;
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);
                    let effective_timeout =
                        self.state.effective_reset_timeout_millis.load(Ordering::Acquire);

                    if elapsed >= effective_timeout {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!(breaker = %self.name_or_unnamed(), "circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                self.state.success_count.store(0, Ordering::Release);
                                self.state.last_probe_at_millis.store(now, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid state transition"),
                        }
                    } else {
                        return Err(ResilienceError::CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let now = self.now_millis();
                    let last_probe = self.state.last_probe_at_millis.load(Ordering::Acquire);
                    let since_last_probe = now.saturating_sub(last_probe);
                    let min_interval = self.config.min_probe_interval.as_millis() as u64;

                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls
                        || (current > 0 && since_last_probe < min_interval)
                    {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(ResilienceError::CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    self.state.last_probe_at_millis.store(now, Ordering::Release);
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "circuit breaker: half-open probe"
                    );
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        self.persist().await;

        result
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);

        match current {
            STATE_HALF_OPEN => {
                let successes = self.state.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_success_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(
                            STATE_HALF_OPEN,
                            STATE_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.success_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    self.state.effective_reset_timeout_millis.store(
                        self.config.recovery_timeout.as_millis() as u64,
                        Ordering::Release,
                    );
                    tracing::info!(breaker = %self.name_or_unnamed(), "circuit breaker -> closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(breaker = %self.name_or_unnamed(), failures, "circuit breaker: probe failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        breaker = %self.name_or_unnamed(),
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn name_or_unnamed(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Current state, for admin/health introspection.
    pub fn state(&self) -> CircuitState {
        self.state.current_state()
    }

    /// Force this breaker back to closed, clearing failure/success counts.
    /// Used by admin endpoints once an operator has confirmed a resource
    /// recovered.
    pub fn reset(&self) {
        self.state.reset();
    }
}
