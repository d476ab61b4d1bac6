//! Queue primitive contract (spec §6.2). The runtime treats the signatures
//! below as canonical and does not accept legacy argument shapes (Open
//! Question (b)).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DbError;

/// One leased row returned by [`QueueStore::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub message: Value,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub visibility_deadline: DateTime<Utc>,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn send(&self, queue: &str, msg: &Value) -> Result<i64, DbError>;

    async fn read(
        &self,
        queue: &str,
        visibility_timeout_sec: i64,
        batch_size: i64,
    ) -> Result<Vec<QueueMessage>, DbError>;

    async fn archive(&self, queue: &str, msg_id: i64) -> Result<bool, DbError>;

    async fn drop_and_recreate(&self, queue: &str) -> Result<(), DbError>;

    /// Messages whose visibility timeout lapsed more than `stalled_after_secs`
    /// ago, cleared so they become pollable again. Used by the maintenance
    /// loop, not by the worker's own `run`.
    async fn recover_stalled(&self, queue: &str, stalled_after_secs: i64) -> Result<u64, DbError>;

    async fn pending_count(&self, queue: &str) -> Result<i64, DbError>;
}

/// Postgres-backed implementation, built atop the `pgmq`-style primitives
/// assumed out of scope by spec §1 (`enqueue`, `read`, `archive`). Each
/// `queue` argument maps to one `pgmq` queue table.
pub struct PgQueueStore {
    pool: sqlx::PgPool,
}

impl PgQueueStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn send(&self, queue: &str, msg: &Value) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as("select * from pgmq.send($1, $2) as t(msg_id bigint)")
            .bind(queue)
            .bind(msg)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(row.0)
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout_sec: i64,
        batch_size: i64,
    ) -> Result<Vec<QueueMessage>, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            msg_id: i64,
            read_ct: i32,
            enqueued_at: DateTime<Utc>,
            vt: DateTime<Utc>,
            message: Value,
        }

        let rows: Vec<Row> = sqlx::query_as(
            "select msg_id, read_ct, enqueued_at, vt, message from pgmq.read($1, $2, $3)",
        )
        .bind(queue)
        .bind(visibility_timeout_sec as i32)
        .bind(batch_size as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::classify)?;

        Ok(rows
            .into_iter()
            .map(|r| QueueMessage {
                msg_id: r.msg_id,
                message: r.message,
                read_count: r.read_ct,
                enqueued_at: r.enqueued_at,
                visibility_deadline: r.vt,
            })
            .collect())
    }

    async fn archive(&self, queue: &str, msg_id: i64) -> Result<bool, DbError> {
        let row: (bool,) = sqlx::query_as("select pgmq.archive($1, $2)")
            .bind(queue)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(row.0)
    }

    async fn drop_and_recreate(&self, queue: &str) -> Result<(), DbError> {
        sqlx::query("select pgmq.drop_queue($1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(DbError::classify)?;
        sqlx::query("select pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(())
    }

    async fn recover_stalled(&self, queue: &str, stalled_after_secs: i64) -> Result<u64, DbError> {
        // `pgmq`'s per-queue table name can't be bound as a parameter; the
        // queue identifier is validated and quoted before interpolation.
        let table = quoted_queue_table(queue)?;
        let sql = format!("update {table} set vt = now() where vt < now() - ($1 || ' seconds')::interval");
        let result = sqlx::query(&sql)
            .bind(stalled_after_secs)
            .execute(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self, queue: &str) -> Result<i64, DbError> {
        let table = quoted_queue_table(queue)?;
        let sql = format!("select count(*) from {table} where vt <= now()");
        let row: (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(row.0)
    }
}

/// `pgmq` backs each queue with a table named `pgmq.q_<queue>`; since table
/// names can't be bound parameters, validate the queue name is a plain
/// identifier (no injection surface) before interpolating it.
fn quoted_queue_table(queue: &str) -> Result<String, DbError> {
    if queue.is_empty()
        || !queue.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || queue.chars().next().map_or(true, |c| c.is_ascii_digit())
    {
        return Err(DbError::Other(sqlx::Error::Configuration(
            format!("invalid queue name: {queue:?}").into(),
        )));
    }
    Ok(format!("pgmq.q_{queue}"))
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct Entry {
        msg_id: i64,
        message: Value,
        read_count: i32,
        enqueued_at: DateTime<Utc>,
        visible_at: DateTime<Utc>,
    }

    /// In-memory fake satisfying [`QueueStore`], so the worker loop, retry
    /// policy, and DLQ behavior are unit-testable without a live Postgres
    /// instance (spec's test-tooling requirement).
    #[derive(Default)]
    pub struct InMemoryQueueStore {
        queues: Mutex<HashMap<String, Vec<Entry>>>,
        next_id: AtomicI64,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn send(&self, queue: &str, msg: &Value) -> Result<i64, DbError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let now = Utc::now();
            self.queues.lock().unwrap().entry(queue.to_string()).or_default().push(Entry {
                msg_id: id,
                message: msg.clone(),
                read_count: 0,
                enqueued_at: now,
                visible_at: now,
            });
            Ok(id)
        }

        async fn read(
            &self,
            queue: &str,
            visibility_timeout_sec: i64,
            batch_size: i64,
        ) -> Result<Vec<QueueMessage>, DbError> {
            let mut queues = self.queues.lock().unwrap();
            let Some(entries) = queues.get_mut(queue) else {
                return Ok(Vec::new());
            };
            let now = Utc::now();
            let mut out = Vec::new();
            for entry in entries.iter_mut() {
                if out.len() as i64 >= batch_size {
                    break;
                }
                if entry.visible_at <= now {
                    entry.read_count += 1;
                    entry.visible_at = now + chrono::Duration::seconds(visibility_timeout_sec);
                    out.push(QueueMessage {
                        msg_id: entry.msg_id,
                        message: entry.message.clone(),
                        read_count: entry.read_count,
                        enqueued_at: entry.enqueued_at,
                        visibility_deadline: entry.visible_at,
                    });
                }
            }
            Ok(out)
        }

        async fn archive(&self, queue: &str, msg_id: i64) -> Result<bool, DbError> {
            let mut queues = self.queues.lock().unwrap();
            let Some(entries) = queues.get_mut(queue) else {
                return Ok(false);
            };
            let before = entries.len();
            entries.retain(|e| e.msg_id != msg_id);
            Ok(entries.len() != before)
        }

        async fn drop_and_recreate(&self, queue: &str) -> Result<(), DbError> {
            self.queues.lock().unwrap().insert(queue.to_string(), Vec::new());
            Ok(())
        }

        async fn recover_stalled(&self, queue: &str, stalled_after_secs: i64) -> Result<u64, DbError> {
            let mut queues = self.queues.lock().unwrap();
            let Some(entries) = queues.get_mut(queue) else {
                return Ok(0);
            };
            let threshold = Utc::now() - chrono::Duration::seconds(stalled_after_secs);
            let mut recovered = 0u64;
            for entry in entries.iter_mut() {
                if entry.read_count > 0 && entry.visible_at < threshold {
                    entry.visible_at = Utc::now();
                    recovered += 1;
                }
            }
            Ok(recovered)
        }

        async fn pending_count(&self, queue: &str) -> Result<i64, DbError> {
            let queues = self.queues.lock().unwrap();
            let Some(entries) = queues.get(queue) else {
                return Ok(0);
            };
            let now = Utc::now();
            Ok(entries.iter().filter(|e| e.visible_at <= now).count() as i64)
        }
    }

}
