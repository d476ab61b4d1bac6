//! Canonical worker error taxonomy (spec §7), surfaced in DLQ `details.category`
//! and driving the poll loop's retry-vs-DLQ decision via [`ErrorCategory`].

use std::fmt;
use std::time::Duration;

use pipeline_core::ErrorCategory;
use thiserror::Error;

/// An error raised by a stage handler or a framework call while processing one
/// message. Each variant maps 1:1 onto an [`ErrorCategory`]; `retry_after` carries
/// a `Retry-After` hint for `RateLimit`, and `source` preserves the underlying
/// cause for logging without forcing every call site to box a trait object.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("message failed schema validation: {reason}")]
    Validation { reason: String },

    #[error("required parent row missing: {reason}")]
    MissingRecord { reason: String },

    #[error("unauthorized: {reason}")]
    Authorization { reason: String },

    #[error("not found: {reason}")]
    NotFound { reason: String },

    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    #[error("operation timed out")]
    Timeout,

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("connection error: {reason}")]
    Connection { reason: String },

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("database error: {0}")]
    DatabaseError(#[source] pipeline_db::DbError),

    #[error("unknown error: {reason}")]
    Unknown { reason: String },
}

impl WorkerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkerError::Validation { .. } => ErrorCategory::Validation,
            WorkerError::MissingRecord { .. } => ErrorCategory::MissingRecord,
            WorkerError::Authorization { .. } => ErrorCategory::Authorization,
            WorkerError::NotFound { .. } => ErrorCategory::NotFound,
            WorkerError::RateLimit { .. } => ErrorCategory::RateLimit,
            WorkerError::Timeout => ErrorCategory::Timeout,
            WorkerError::Network { .. } => ErrorCategory::Network,
            WorkerError::Connection { .. } => ErrorCategory::Connection,
            WorkerError::Transient { .. } => ErrorCategory::Transient,
            WorkerError::DatabaseError(_) => ErrorCategory::DatabaseError,
            WorkerError::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WorkerError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Error message plus category, shaped for `details.category`/`details.message`
    /// in a DLQ row.
    pub fn dlq_details(&self) -> serde_json::Value {
        serde_json::json!({
            "category": self.category().to_string(),
            "message": self.to_string(),
        })
    }
}

impl From<pipeline_db::DbError> for WorkerError {
    fn from(err: pipeline_db::DbError) -> Self {
        if err.is_retryable() {
            WorkerError::Transient { reason: err.to_string() }
        } else {
            WorkerError::DatabaseError(err)
        }
    }
}

/// Implemented by `pipeline-stages`' `StageError` so handler code can use `?`
/// uniformly against both framework calls (already `WorkerError`) and domain
/// logic raising its own error type.
pub trait IntoWorkerError: fmt::Debug {
    fn into_worker_error(self) -> WorkerError;
}

impl IntoWorkerError for WorkerError {
    fn into_worker_error(self) -> WorkerError {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_matches_dlq_table() {
        assert_eq!(WorkerError::Validation { reason: "x".into() }.category(), ErrorCategory::Validation);
        assert_eq!(
            WorkerError::MissingRecord { reason: "x".into() }.category(),
            ErrorCategory::MissingRecord
        );
        assert_eq!(WorkerError::RateLimit { retry_after: None }.category(), ErrorCategory::RateLimit);
        assert_eq!(WorkerError::Timeout.category(), ErrorCategory::Timeout);
        assert_eq!(WorkerError::Unknown { reason: "x".into() }.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = WorkerError::RateLimit { retry_after: Some(Duration::from_secs(3)) };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn database_error_from_retryable_db_error_is_transient() {
        let db_err = pipeline_db::DbError::SerializationFailure;
        let worker_err: WorkerError = db_err.into();
        assert_eq!(worker_err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn database_error_from_non_retryable_db_error_stays_database_error() {
        let db_err = pipeline_db::DbError::NotFound;
        let worker_err: WorkerError = db_err.into();
        assert_eq!(worker_err.category(), ErrorCategory::DatabaseError);
    }

    #[test]
    fn dlq_details_includes_category_and_message() {
        let err = WorkerError::NotFound { reason: "track 123".into() };
        let details = err.dlq_details();
        assert_eq!(details["category"], "not_found");
        assert!(details["message"].as_str().unwrap().contains("track 123"));
    }
}
