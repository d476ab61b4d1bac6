//! Insert helpers for the runtime bookkeeping tables of `migrations/0001_init.sql`
//! (spec §6.3): per-message metrics, dead-letter items, trace spans, and the
//! maintenance/validation audit trails. `pipeline-worker` is the only caller.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DbError;
use crate::models::MetricStatus;

pub async fn record_queue_metric(
    pool: &sqlx::PgPool,
    queue: &str,
    msg_id: i64,
    status: MetricStatus,
    processing_ms: i64,
    span_id: Option<&str>,
    details: Value,
) -> Result<(), DbError> {
    sqlx::query(
        "insert into queue_metrics (queue, msg_id, status, processing_ms, span_id, details) \
         values ($1, $2, $3, $4, $5, $6)",
    )
    .bind(queue)
    .bind(msg_id)
    .bind(status)
    .bind(processing_ms)
    .bind(span_id)
    .bind(details)
    .execute(pool)
    .await
    .map_err(DbError::classify)?;
    Ok(())
}

pub async fn record_dead_letter(
    pool: &sqlx::PgPool,
    queue: &str,
    original_message: &Value,
    fail_count: i32,
    details: Value,
) -> Result<i64, DbError> {
    let row: (i64,) = sqlx::query_as(
        "insert into pgmq_dead_letter_items (queue, original_message, fail_count, details) \
         values ($1, $2, $3, $4) returning id",
    )
    .bind(queue)
    .bind(original_message)
    .bind(fail_count)
    .bind(details)
    .fetch_one(pool)
    .await
    .map_err(DbError::classify)?;
    Ok(row.0)
}

#[allow(clippy::too_many_arguments)]
pub async fn record_trace_span(
    pool: &sqlx::PgPool,
    trace_id: &str,
    span_id: &str,
    parent_id: Option<&str>,
    service: &str,
    operation: &str,
    timestamp_start: DateTime<Utc>,
    duration_ms: Option<i64>,
    status: Option<&str>,
    attributes: Value,
    error_fields: Option<Value>,
) -> Result<(), DbError> {
    sqlx::query(
        "insert into traces \
         (trace_id, span_id, parent_id, service, operation, timestamp_start, duration_ms, \
          status, attributes, error_fields) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         on conflict (trace_id, span_id) do update set \
            duration_ms = excluded.duration_ms, status = excluded.status, \
            attributes = excluded.attributes, error_fields = excluded.error_fields",
    )
    .bind(trace_id)
    .bind(span_id)
    .bind(parent_id)
    .bind(service)
    .bind(operation)
    .bind(timestamp_start)
    .bind(duration_ms)
    .bind(status)
    .bind(attributes)
    .bind(error_fields)
    .execute(pool)
    .await
    .map_err(DbError::classify)?;
    Ok(())
}

pub async fn record_maintenance_log(
    pool: &sqlx::PgPool,
    stalled_recovered: i32,
    queue_health: Value,
) -> Result<(), DbError> {
    sqlx::query("insert into maintenance_logs (stalled_recovered, queue_health) values ($1, $2)")
        .bind(stalled_recovered)
        .bind(queue_health)
        .execute(pool)
        .await
        .map_err(DbError::classify)?;
    Ok(())
}

pub async fn record_queue_health(pool: &sqlx::PgPool, queue: &str, pending_count: i64) -> Result<(), DbError> {
    sqlx::query("insert into queue_health_logs (queue, pending_count) values ($1, $2)")
        .bind(queue)
        .bind(pending_count)
        .execute(pool)
        .await
        .map_err(DbError::classify)?;
    Ok(())
}

pub async fn record_validation_report(
    pool: &sqlx::PgPool,
    queue: &str,
    msg_id: Option<i64>,
    reason: &str,
    payload: Option<Value>,
) -> Result<(), DbError> {
    sqlx::query("insert into validation_reports (queue, msg_id, reason, payload) values ($1, $2, $3, $4)")
        .bind(queue)
        .bind(msg_id)
        .bind(reason)
        .bind(payload)
        .execute(pool)
        .await
        .map_err(DbError::classify)?;
    Ok(())
}
