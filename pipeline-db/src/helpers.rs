//! DB helpers (spec §4.5): idempotent upsert, a retry wrapper for the handful
//! of transient Postgres errors, and a transaction wrapper.

use std::future::Future;
use std::time::Duration;

use crate::error::DbError;

/// Attempt an upsert; on a unique-violation race, fall back to fetching the
/// existing row. `insert` and `fetch_existing` are caller-provided closures
/// so this stays generic over the entity being upserted.
///
/// Guarantees one row per external key under concurrent writers: if two
/// callers race to insert the same `spotifyId`, exactly one `insert` wins and
/// the other observes a unique-violation and falls through to `fetch_existing`.
pub async fn safe_upsert<T, InsertFut, FetchFut>(
    insert: impl FnOnce() -> InsertFut,
    fetch_existing: impl FnOnce() -> FetchFut,
) -> Result<T, DbError>
where
    InsertFut: Future<Output = Result<T, DbError>>,
    FetchFut: Future<Output = Result<T, DbError>>,
{
    match insert().await {
        Ok(row) => Ok(row),
        Err(DbError::UniqueViolation { .. }) => fetch_existing().await,
        Err(other) => Err(other),
    }
}

/// Retry a DB operation up to 3 times on unique-violation (race), serialization
/// failure, deadlock, or connection error, with a small fixed backoff between
/// attempts.
pub async fn with_db_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T, DbError>
where
    Fut: Future<Output = Result<T, DbError>>,
{
    const MAX_ATTEMPTS: usize = 3;
    const BACKOFF: Duration = Duration::from_millis(50);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "retrying db operation");
                tokio::time::sleep(BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Begin a transaction, run `op` against it, and commit on success or roll
/// back on any error (including one raised by `op` itself).
pub async fn with_transaction<T, F>(pool: &sqlx::PgPool, op: F) -> Result<T, DbError>
where
    for<'c> F: FnOnce(
        &'c mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'c>>,
{
    let mut tx = pool.begin().await.map_err(DbError::classify)?;
    match op(&mut tx).await {
        Ok(value) => {
            tx.commit().await.map_err(DbError::classify)?;
            Ok(value)
        }
        Err(err) => {
            // Best-effort rollback; the original error is what the caller cares about.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn safe_upsert_falls_back_to_fetch_on_unique_violation() {
        let result: Result<&str, DbError> = safe_upsert(
            || async { Err(DbError::UniqueViolation { constraint: "artists_spotify_id_key".into() }) },
            || async { Ok("existing-row") },
        )
        .await;
        assert_eq!(result.unwrap(), "existing-row");
    }

    #[tokio::test]
    async fn safe_upsert_returns_insert_result_on_success() {
        let result: Result<&str, DbError> = safe_upsert(
            || async { Ok("inserted-row") },
            || async { panic!("should not be called") },
        )
        .await;
        assert_eq!(result.unwrap(), "inserted-row");
    }

    #[tokio::test]
    async fn with_db_retry_retries_serialization_failures_then_succeeds() {
        let attempts = AtomicUsize::new(0);
        let result = with_db_retry(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(DbError::SerializationFailure)
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_db_retry_gives_up_after_three_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), DbError> = with_db_retry(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Deadlock)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_db_retry_does_not_retry_non_retryable_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), DbError> = with_db_retry(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DbError::NotFound)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
