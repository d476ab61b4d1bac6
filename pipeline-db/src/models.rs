//! Durable entities of the data model (spec §3), mapped 1:1 onto the tables
//! created by `migrations/0001_init.sql`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Artist {
    pub id: Uuid,
    pub spotify_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Album {
    pub id: Uuid,
    pub spotify_id: String,
    pub artist_id: Uuid,
    pub name: String,
    pub release_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub spotify_id: String,
    pub album_id: Uuid,
    pub name: String,
    pub duration_ms: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct NormalizedTrack {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub normalized_name: String,
    pub representative_track_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Producer {
    pub id: Uuid,
    pub normalized_name: String,
    pub display_name: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct TrackProducer {
    pub track_id: Uuid,
    pub producer_id: Uuid,
    pub source: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct RateLimitRow {
    pub key: String,
    pub count: i32,
    pub window_end_millis: i64,
    pub max_requests: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i16)]
pub enum CircuitStateRow {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct CircuitBreakerRow {
    pub name: String,
    pub state: i16,
    pub failure_count: i32,
    pub success_count: i32,
    pub last_failure_time_millis: Option<i64>,
    pub last_state_change: DateTime<Utc>,
    pub failure_threshold: i32,
    pub reset_timeout_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MetricStatus {
    Success,
    Error,
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueMetric {
    pub id: i64,
    pub queue: String,
    pub msg_id: i64,
    pub status: String,
    pub processing_ms: i64,
    pub span_id: Option<String>,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: i64,
    pub queue: String,
    pub original_message: Value,
    pub fail_count: i32,
    pub failed_at: DateTime<Utc>,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct TraceSpanRow {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
    pub service: String,
    pub operation: String,
    pub timestamp_start: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub status: Option<String>,
    pub attributes: Value,
    pub error_fields: Option<Value>,
}
