//! Typed query functions over the roll-up views in `migrations/0002_views.sql`
//! (spec §6.3), so the maintenance loop and admin health endpoint never hand-roll
//! this SQL themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub success_count: i64,
    pub error_count: i64,
    pub partial_failure_count: i64,
    pub avg_processing_ms: Option<f64>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct DeadLetterAnalysis {
    pub queue: String,
    pub total_items: i64,
    pub avg_fail_count: Option<f64>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueErrorRate {
    pub queue: String,
    pub errors: i64,
    pub total: i64,
    pub error_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueLatencyStats {
    pub queue: String,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub span_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub had_error: Option<bool>,
}

pub async fn queue_stats(pool: &sqlx::PgPool) -> Result<Vec<QueueStats>, sqlx::Error> {
    sqlx::query_as("select * from queue_stats").fetch_all(pool).await
}

pub async fn queue_stats_for(pool: &sqlx::PgPool, queue: &str) -> Result<Option<QueueStats>, sqlx::Error> {
    sqlx::query_as("select * from queue_stats where queue = $1")
        .bind(queue)
        .fetch_optional(pool)
        .await
}

pub async fn dead_letter_analysis(pool: &sqlx::PgPool) -> Result<Vec<DeadLetterAnalysis>, sqlx::Error> {
    sqlx::query_as("select * from dead_letter_analysis").fetch_all(pool).await
}

pub async fn queue_error_rates(pool: &sqlx::PgPool) -> Result<Vec<QueueErrorRate>, sqlx::Error> {
    sqlx::query_as("select * from queue_error_rates").fetch_all(pool).await
}

pub async fn queue_latency_stats(pool: &sqlx::PgPool) -> Result<Vec<QueueLatencyStats>, sqlx::Error> {
    sqlx::query_as("select * from queue_latency_stats").fetch_all(pool).await
}

pub async fn trace_summary(pool: &sqlx::PgPool, trace_id: &str) -> Result<Option<TraceSummary>, sqlx::Error> {
    sqlx::query_as("select * from trace_summary where trace_id = $1")
        .bind(trace_id)
        .fetch_optional(pool)
        .await
}
