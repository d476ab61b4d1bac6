//! Pluggable sink for per-message metrics, dead-letter items, trace spans, and
//! validation reports (spec §6.3). `WorkerBase`/`trace_operation` depend on the
//! [`MetricsRecorder`] trait rather than `sqlx::PgPool` directly so the
//! poll/dispatch/retry/DLQ state machine is unit-testable against the
//! in-memory fake below, without a live Postgres instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use pipeline_db::models::MetricStatus;
use pipeline_db::DbError;

#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record_metric(
        &self,
        queue: &str,
        msg_id: i64,
        status: MetricStatus,
        processing_ms: i64,
        span_id: Option<&str>,
        details: Value,
    ) -> Result<(), DbError>;

    async fn record_dead_letter(
        &self,
        queue: &str,
        original_message: &Value,
        fail_count: i32,
        details: Value,
    ) -> Result<i64, DbError>;

    async fn record_validation_report(
        &self,
        queue: &str,
        msg_id: Option<i64>,
        reason: &str,
        payload: Option<Value>,
    ) -> Result<(), DbError>;

    #[allow(clippy::too_many_arguments)]
    async fn record_trace_span(
        &self,
        trace_id: &str,
        span_id: &str,
        parent_id: Option<&str>,
        service: &str,
        operation: &str,
        timestamp_start: DateTime<Utc>,
        duration_ms: Option<i64>,
        status: Option<&str>,
        error_fields: Option<Value>,
    ) -> Result<(), DbError>;
}

#[async_trait]
impl MetricsRecorder for sqlx::PgPool {
    async fn record_metric(
        &self,
        queue: &str,
        msg_id: i64,
        status: MetricStatus,
        processing_ms: i64,
        span_id: Option<&str>,
        details: Value,
    ) -> Result<(), DbError> {
        pipeline_db::metrics::record_queue_metric(self, queue, msg_id, status, processing_ms, span_id, details).await
    }

    async fn record_dead_letter(
        &self,
        queue: &str,
        original_message: &Value,
        fail_count: i32,
        details: Value,
    ) -> Result<i64, DbError> {
        pipeline_db::metrics::record_dead_letter(self, queue, original_message, fail_count, details).await
    }

    async fn record_validation_report(
        &self,
        queue: &str,
        msg_id: Option<i64>,
        reason: &str,
        payload: Option<Value>,
    ) -> Result<(), DbError> {
        pipeline_db::metrics::record_validation_report(self, queue, msg_id, reason, payload).await
    }

    async fn record_trace_span(
        &self,
        trace_id: &str,
        span_id: &str,
        parent_id: Option<&str>,
        service: &str,
        operation: &str,
        timestamp_start: DateTime<Utc>,
        duration_ms: Option<i64>,
        status: Option<&str>,
        error_fields: Option<Value>,
    ) -> Result<(), DbError> {
        pipeline_db::metrics::record_trace_span(
            self,
            trace_id,
            span_id,
            parent_id,
            service,
            operation,
            timestamp_start,
            duration_ms,
            status,
            serde_json::json!({}),
            error_fields,
        )
        .await
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every call in memory instead of touching a database, so
    /// `WorkerBase::dispatch_one` can be driven end-to-end (together with
    /// `pipeline_db::testing::InMemoryQueueStore`) without Postgres.
    #[derive(Default)]
    pub struct InMemoryMetricsRecorder {
        pub metrics: Mutex<Vec<(String, i64, MetricStatus)>>,
        pub dead_letters: Mutex<Vec<(String, Value, i32)>>,
        pub validation_reports: Mutex<Vec<(String, Option<i64>, String)>>,
        pub spans: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl InMemoryMetricsRecorder {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl MetricsRecorder for InMemoryMetricsRecorder {
        async fn record_metric(
            &self,
            queue: &str,
            msg_id: i64,
            status: MetricStatus,
            _processing_ms: i64,
            _span_id: Option<&str>,
            _details: Value,
        ) -> Result<(), DbError> {
            self.metrics.lock().unwrap().push((queue.to_string(), msg_id, status));
            Ok(())
        }

        async fn record_dead_letter(
            &self,
            queue: &str,
            original_message: &Value,
            fail_count: i32,
            _details: Value,
        ) -> Result<i64, DbError> {
            let mut guard = self.dead_letters.lock().unwrap();
            guard.push((queue.to_string(), original_message.clone(), fail_count));
            Ok(guard.len() as i64)
        }

        async fn record_validation_report(
            &self,
            queue: &str,
            msg_id: Option<i64>,
            reason: &str,
            _payload: Option<Value>,
        ) -> Result<(), DbError> {
            self.validation_reports.lock().unwrap().push((queue.to_string(), msg_id, reason.to_string()));
            Ok(())
        }

        async fn record_trace_span(
            &self,
            trace_id: &str,
            span_id: &str,
            parent_id: Option<&str>,
            _service: &str,
            _operation: &str,
            _timestamp_start: DateTime<Utc>,
            _duration_ms: Option<i64>,
            _status: Option<&str>,
            _error_fields: Option<Value>,
        ) -> Result<(), DbError> {
            self.spans.lock().unwrap().push((trace_id.to_string(), span_id.to_string(), parent_id.map(String::from)));
            Ok(())
        }
    }
}
