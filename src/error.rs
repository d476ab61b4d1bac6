//! Error types for resilience policies

use std::fmt;
use std::time::{Duration, SystemTime};

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Upper bound applied to any delay derived from a `Retry-After` header, so a
/// misbehaving upstream cannot stall a worker indefinitely.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Canonical error classification shared by the retry policy, the circuit breaker,
/// and the worker poll loop's DLQ-vs-leave-unacked decision.
///
/// This is the single taxonomy named in the error-handling design: every failure a
/// stage handler or a framework call can raise maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Message failed schema validation.
    Validation,
    /// A required parent row (artist/album/track) is missing.
    MissingRecord,
    /// 401/403 from an external API.
    Authorization,
    /// 404 from an external API.
    NotFound,
    /// 429, optionally carrying a `Retry-After` hint.
    RateLimit,
    /// The operation exceeded its deadline.
    Timeout,
    /// DNS/connect/reset-class network failure.
    Network,
    /// Connection-level failure distinct from a generic network error.
    Connection,
    /// 408/425/5xx or another retryable server-side failure.
    Transient,
    /// A database integrity violation `safe_upsert` could not resolve.
    DatabaseError,
    /// Anything that doesn't fit a more specific bucket; treated as retryable.
    Unknown,
}

impl ErrorCategory {
    /// Whether the worker loop should leave the message unacked for redelivery
    /// (as opposed to routing it straight to the dead-letter queue).
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCategory::Validation
            | ErrorCategory::MissingRecord
            | ErrorCategory::Authorization
            | ErrorCategory::NotFound
            | ErrorCategory::DatabaseError => false,
            ErrorCategory::RateLimit
            | ErrorCategory::Timeout
            | ErrorCategory::Network
            | ErrorCategory::Connection
            | ErrorCategory::Transient
            | ErrorCategory::Unknown => true,
        }
    }

    /// Whether this category should be routed to the dead-letter queue on first
    /// occurrence, independent of remaining retry budget.
    pub fn dlq_immediately(&self) -> bool {
        !self.is_retryable()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::MissingRecord => "missing_record",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Transient => "transient",
            ErrorCategory::DatabaseError => "database_error",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Parse a `Retry-After` header value into a `Duration`, capped at
/// [`MAX_RETRY_AFTER`]. Accepts an integer number of seconds, an HTTP-date, or a
/// Unix timestamp (seconds since epoch) — the three shapes real APIs send.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(secs) = trimmed.parse::<u64>() {
        // Could be a delta-seconds value or, for a sufficiently large number, a
        // Unix timestamp. Anything past the year 2000 in epoch-seconds is treated
        // as a timestamp; otherwise it's a delta.
        const UNIX_TIMESTAMP_FLOOR: u64 = 946_684_800; // 2000-01-01T00:00:00Z
        let delay = if secs >= UNIX_TIMESTAMP_FLOOR {
            let target = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
            target.duration_since(now).unwrap_or(Duration::ZERO)
        } else {
            Duration::from_secs(secs)
        };
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    if let Ok(when) = httpdate::parse_http_date(trimmed) {
        let delay = when.duration_since(now).unwrap_or(Duration::ZERO);
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    None
}

/// Unified error type for all resilience policies
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The operation exceeded the timeout duration
    Timeout { elapsed: Duration, timeout: Duration },
    /// The bulkhead rejected the operation due to capacity
    Bulkhead { in_flight: usize, max: usize },
    /// The circuit breaker is open
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted
    RetryExhausted { attempts: usize, failures: Vec<E> },
    /// The underlying operation failed
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::Bulkhead { in_flight, max } => {
                Self::Bulkhead { in_flight: *in_flight, max: *max }
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::RetryExhausted { attempts, failures } => {
                Self::RetryExhausted { attempts: *attempts, failures: failures.clone() }
            }
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        use ResilienceError::*;
        match (self, other) {
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (Bulkhead { in_flight: a1, max: b1 }, Bulkhead { in_flight: a2, max: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (
                CircuitOpen { failure_count: f1, open_duration: d1 },
                CircuitOpen { failure_count: f2, open_duration: d2 },
            ) => f1 == f2 && d1 == d2,
            (
                RetryExhausted { attempts: a1, failures: f1 },
                RetryExhausted { attempts: a2, failures: f2 },
            ) => a1 == a2 && f1 == f2,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for ResilienceError<E> {}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Bulkhead { in_flight, max } => {
                write!(f, "bulkhead rejected request ({} in-flight, max {})", in_flight, max)
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({} failures, open for {:?})",
                    failure_count, open_duration
                )
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(
                    f,
                    "retry exhausted after {} attempts ({} failures), last error: {}",
                    attempts,
                    failures.len(),
                    last
                )
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is due to bulkhead rejection
    pub fn is_bulkhead(&self) -> bool {
        matches!(self, Self::Bulkhead { .. })
    }

    /// Check if this error is due to retry exhaustion
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access all recorded failures for RetryExhausted, if present.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the inner error if present.
    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;
    use std::io;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn timeout_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5.1"));
    }

    #[test]
    fn bulkhead_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Bulkhead { in_flight: 50, max: 50 };
        let msg = format!("{}", err);
        assert!(msg.contains("bulkhead"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn circuit_open_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::CircuitOpen {
            failure_count: 10,
            open_duration: Duration::from_secs(30),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("circuit breaker"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err: ResilienceError<DummyError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: vec![DummyError("first"), DummyError("last")],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3"));
        assert!(msg.contains("last error"));
        assert!(msg.contains("last"));
    }

    #[test]
    fn is_timeout_check() {
        let err: ResilienceError<io::Error> = ResilienceError::Timeout {
            elapsed: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(!err.is_circuit_open());
        assert!(!err.is_bulkhead());
    }

    #[test]
    fn into_inner_extracts_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err = ResilienceError::Inner(io_err);
        let extracted = err.into_inner().unwrap();
        assert_eq!(extracted.to_string(), "test");
    }

    #[test]
    fn source_returns_last_failure_for_retry_exhausted() {
        let err: ResilienceError<DummyError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: vec![DummyError("a"), DummyError("b")],
        };
        let src = err.source().unwrap();
        assert_eq!(src.to_string(), "b");
    }

    #[test]
    fn source_is_none_for_timeout() {
        let err: ResilienceError<DummyError> = ResilienceError::Timeout {
            elapsed: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };
        assert!(err.source().is_none());
    }

    #[test]
    fn predicates_cover_all_variants() {
        let timeout: ResilienceError<DummyError> = ResilienceError::Timeout {
            elapsed: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_circuit_open());

        let bulkhead: ResilienceError<DummyError> =
            ResilienceError::Bulkhead { in_flight: 1, max: 1 };
        assert!(bulkhead.is_bulkhead());

        let circuit: ResilienceError<DummyError> = ResilienceError::CircuitOpen {
            failure_count: 1,
            open_duration: Duration::from_secs(1),
        };
        assert!(circuit.is_circuit_open());

        let retry: ResilienceError<DummyError> =
            ResilienceError::RetryExhausted { attempts: 2, failures: vec![] };
        assert!(retry.is_retry_exhausted());
    }

    #[test]
    fn as_inner_accessors_work() {
        let mut err: ResilienceError<DummyError> = ResilienceError::Inner(DummyError("x"));
        assert!(err.is_inner());
        assert_eq!(err.as_inner().unwrap().0, "x");
        if let Some(inner) = err.as_inner_mut() {
            inner.0 = "y";
        }
        assert_eq!(err.as_inner().unwrap().0, "y");
    }

    #[test]
    fn category_retryability_matches_dlq_table() {
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::MissingRecord.is_retryable());
        assert!(!ErrorCategory::Authorization.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::DatabaseError.is_retryable());
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Connection.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn parse_retry_after_accepts_delta_seconds() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let delay = parse_retry_after("3", now).expect("should parse");
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn parse_retry_after_accepts_unix_timestamp() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        let target = 2_000_000_030u64;
        let delay = parse_retry_after(&target.to_string(), now).expect("should parse");
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn parse_retry_after_caps_at_max() {
        let now = SystemTime::UNIX_EPOCH;
        let delay = parse_retry_after("99999", now).expect("should parse");
        assert_eq!(delay, MAX_RETRY_AFTER);
    }

    #[test]
    fn parse_retry_after_accepts_http_date() {
        let now = httpdate::parse_http_date("Sun, 06 Nov 1994 08:49:36 GMT").unwrap();
        let later = "Sun, 06 Nov 1994 08:49:40 GMT";
        let delay = parse_retry_after(later, now).expect("should parse");
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        let now = SystemTime::now();
        assert!(parse_retry_after("not-a-date", now).is_none());
    }
}
