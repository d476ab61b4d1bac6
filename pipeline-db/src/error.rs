//! DB-boundary error type, classified so `pipeline-worker`'s retry policy can
//! decide DLQ vs. leave-unacked without matching on `sqlx::Error` directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unique constraint violated on {constraint}")]
    UniqueViolation { constraint: String },

    #[error("serialization failure, safe to retry")]
    SerializationFailure,

    #[error("deadlock detected, safe to retry")]
    Deadlock,

    #[error("database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] sqlx::Error),
}

impl DbError {
    /// Classify a raw `sqlx::Error` into the taxonomy above by inspecting the
    /// Postgres SQLSTATE code, falling back to `Other` for anything else.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => DbError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                Some("40001") => DbError::SerializationFailure,
                Some("40P01") => DbError::Deadlock,
                _ => DbError::Other(err),
            },
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DbError::Connection(err)
            }
            _ => DbError::Other(err),
        }
    }

    /// Whether `with_db_retry` should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::UniqueViolation { .. }
                | DbError::SerializationFailure
                | DbError::Deadlock
                | DbError::Connection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_retryable() {
        let err = DbError::UniqueViolation { constraint: "artists_spotify_id_key".into() };
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_is_not_retryable() {
        assert!(!DbError::NotFound.is_retryable());
    }
}
