//! Policy-level telemetry events. Separate from `tracing`'s structured logs:
//! these are typed events a dashboard or alerting pipeline can subscribe to
//! without parsing log lines, emitted alongside (not instead of) the
//! corresponding `tracing` call at each policy decision point.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "telemetry-json", derive(serde::Serialize))]
#[cfg_attr(feature = "telemetry-json", serde(tag = "kind"))]
pub enum PolicyEvent {
    RetryAttempt { resource: String, attempt: usize, delay: Duration },
    RetryExhausted { resource: String, attempts: usize },
    CircuitOpened { resource: String, failure_count: usize },
    CircuitClosed { resource: String },
    CircuitHalfOpenProbe { resource: String },
    RateLimited { resource: String, remaining: u32 },
    CacheHit { namespace: String, key: String },
    CacheMiss { namespace: String, key: String },
    BulkheadRejected { resource: String, in_flight: usize, max: usize },
    Timeout { resource: String, elapsed: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryAttempt { resource, attempt, delay } => {
                write!(f, "retry[{resource}] attempt {attempt} after {delay:?}")
            }
            Self::RetryExhausted { resource, attempts } => {
                write!(f, "retry[{resource}] exhausted after {attempts} attempts")
            }
            Self::CircuitOpened { resource, failure_count } => {
                write!(f, "circuit[{resource}] opened after {failure_count} failures")
            }
            Self::CircuitClosed { resource } => write!(f, "circuit[{resource}] closed"),
            Self::CircuitHalfOpenProbe { resource } => write!(f, "circuit[{resource}] half-open probe"),
            Self::RateLimited { resource, remaining } => {
                write!(f, "rate_limit[{resource}] remaining={remaining}")
            }
            Self::CacheHit { namespace, key } => write!(f, "cache[{namespace}] hit {key}"),
            Self::CacheMiss { namespace, key } => write!(f, "cache[{namespace}] miss {key}"),
            Self::BulkheadRejected { resource, in_flight, max } => {
                write!(f, "bulkhead[{resource}] rejected ({in_flight}/{max})")
            }
            Self::Timeout { resource, elapsed } => write!(f, "timeout[{resource}] after {elapsed:?}"),
        }
    }
}

/// Sink for [`PolicyEvent`]s. Implementations must not block the policy
/// thread; `TracingSink` and `NullSink` are synchronous and cheap, while a
/// real metrics backend should buffer internally.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: PolicyEvent);
}

/// Forwards every event into `tracing` at an appropriate level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: PolicyEvent) {
        match &event {
            PolicyEvent::CircuitOpened { .. } | PolicyEvent::RetryExhausted { .. } => {
                tracing::warn!(%event, "policy event");
            }
            PolicyEvent::BulkheadRejected { .. } | PolicyEvent::Timeout { .. } => {
                tracing::warn!(%event, "policy event");
            }
            _ => tracing::debug!(%event, "policy event"),
        }
    }
}

/// Discards every event. The default when no telemetry backend is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _event: PolicyEvent) {}
}

/// Serializes every event to JSON and forwards it through `tracing` as a
/// single structured field, for log pipelines that parse JSON lines rather
/// than `Display` text.
#[cfg(feature = "telemetry-json")]
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSink;

#[cfg(feature = "telemetry-json")]
impl TelemetrySink for JsonSink {
    fn record(&self, event: PolicyEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(policy_event = %json, "policy event"),
            Err(err) => tracing::warn!(%err, "failed to serialize policy event"),
        }
    }
}

/// Records every event in-memory, for assertions in tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, event: PolicyEvent) {
        self.events.lock().unwrap().push(event);
    }
}
