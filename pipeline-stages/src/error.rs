//! Domain-level errors raised by stage handlers (spec §7), convertible into
//! [`pipeline_worker::WorkerError`] so handler code can use `?` uniformly
//! against framework calls and its own domain logic.

use std::time::Duration;

use pipeline_worker::{IntoWorkerError, WorkerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("message failed schema validation: {reason}")]
    Validation { reason: String },

    #[error("required parent row missing: {reason}")]
    MissingRecord { reason: String },

    #[error("unauthorized calling external API: {reason}")]
    Authorization { reason: String },

    #[error("not found: {reason}")]
    NotFound { reason: String },

    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    #[error("external call timed out")]
    Timeout,

    #[error("network error calling external API: {reason}")]
    Network { reason: String },

    #[error("database error: {0}")]
    Database(#[from] pipeline_db::DbError),

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("unknown error: {reason}")]
    Unknown { reason: String },
}

impl IntoWorkerError for StageError {
    fn into_worker_error(self) -> WorkerError {
        match self {
            StageError::Validation { reason } => WorkerError::Validation { reason },
            StageError::MissingRecord { reason } => WorkerError::MissingRecord { reason },
            StageError::Authorization { reason } => WorkerError::Authorization { reason },
            StageError::NotFound { reason } => WorkerError::NotFound { reason },
            StageError::RateLimit { retry_after } => WorkerError::RateLimit { retry_after },
            StageError::Timeout => WorkerError::Timeout,
            StageError::Network { reason } => WorkerError::Network { reason },
            StageError::Database(err) => err.into(),
            StageError::Transient { reason } => WorkerError::Transient { reason },
            StageError::Unknown { reason } => WorkerError::Unknown { reason },
        }
    }
}

/// `reqwest`-level failures are always worth a retry classification, never a
/// hard validation failure — network flakiness, not a malformed message.
impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StageError::Timeout
        } else if err.is_connect() {
            StageError::Network { reason: err.to_string() }
        } else {
            StageError::Transient { reason: err.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::ErrorCategory;

    #[test]
    fn maps_onto_worker_error_category() {
        let err = StageError::MissingRecord { reason: "artist row".into() };
        assert_eq!(err.into_worker_error().category(), ErrorCategory::MissingRecord);
    }

    #[test]
    fn database_error_converts_through_worker_error_from_impl() {
        let err = StageError::Database(pipeline_db::DbError::NotFound);
        assert_eq!(err.into_worker_error().category(), ErrorCategory::DatabaseError);
    }
}
