//! `WorkerBase`: the poll → validate → dispatch → ack/retry/DLQ spine (spec §4.7),
//! built from the root crate's `ResilienceStack` composition idiom — here just the
//! circuit-breaker and timeout layers, since the worker's own retry is VT-redelivery,
//! not an in-process retry loop.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use pipeline_core::{
    CircuitBreakerRegistry, CircuitBreakerRegistryOptions, ResilienceError, TimeoutPolicy,
};
use pipeline_db::models::MetricStatus;
use pipeline_db::QueueStore;

use crate::error::WorkerError;
use crate::metrics::MetricsRecorder;
use crate::trace::{trace_operation, TraceContext};

/// Configuration for one worker instance, one per stage queue.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    /// `service` field recorded on every trace span this worker opens.
    pub service_name: String,
    pub visibility_timeout_secs: i64,
    pub batch_size: i64,
    pub max_retries: i32,
    pub per_message_timeout: Duration,
    pub worker_instance: String,
}

/// What a handler sees while processing one message: enqueue capability and the
/// span its own downstream messages should be parented to.
pub struct WorkerContext {
    queue_store: Arc<dyn QueueStore>,
    span: TraceContext,
    source_queue: String,
}

impl WorkerContext {
    pub fn trace_context(&self) -> &TraceContext {
        &self.span
    }

    /// Wrap `payload` with a fresh span (parented to the current one) and send
    /// it to `target_queue`.
    pub async fn enqueue(
        &self,
        target_queue: &str,
        payload: impl Serialize,
    ) -> Result<i64, WorkerError> {
        let mut value = serde_json::to_value(payload)
            .map_err(|e| WorkerError::Unknown { reason: format!("payload not serializable: {e}") })?;
        let child = self.span.child();
        match &mut value {
            Value::Object(map) => {
                map.insert(
                    "traceContext".to_string(),
                    serde_json::to_value(&child).expect("TraceContext always serializes"),
                );
            }
            _ => {
                return Err(WorkerError::Unknown {
                    reason: "enqueue payload must serialize to a JSON object".into(),
                })
            }
        }

        let msg_id = self
            .queue_store
            .send(target_queue, &value)
            .await
            .map_err(WorkerError::from)?;
        tracing::info!(
            source = %self.source_queue,
            target = %target_queue,
            msg_id,
            "enqueued"
        );
        Ok(msg_id)
    }
}

/// Implemented once per stage. `T` is the stage's typed payload (the part of the
/// message besides `traceContext`).
#[async_trait]
pub trait WorkerHandler<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn process(&self, payload: T, ctx: &WorkerContext) -> Result<(), WorkerError>;

    /// Deserialize the payload out of the raw row. The default simply decodes
    /// `T` from the whole JSON value (an extra `traceContext` key is ignored by
    /// serde's default unknown-field handling); stages with bespoke validation
    /// rules override this.
    fn validate_message(&self, raw: &Value) -> Result<T, WorkerError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(raw.clone())
            .map_err(|e| WorkerError::Validation { reason: e.to_string() })
    }
}

/// Outcome of one `run_once` poll cycle, returned for the HTTP tick endpoint and
/// maintenance logging — never itself an error; individual message failures are
/// folded into `dead_lettered`/`left_for_retry`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub succeeded: usize,
    pub dead_lettered: usize,
    pub left_for_retry: usize,
}

pub struct WorkerBase<T, H> {
    config: WorkerConfig,
    queue_store: Arc<dyn QueueStore>,
    recorder: Arc<dyn MetricsRecorder>,
    breakers: Arc<CircuitBreakerRegistry>,
    handler: H,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> WorkerBase<T, H>
where
    T: Send + Sync + Clone + DeserializeOwned + 'static,
    H: WorkerHandler<T>,
{
    pub fn new(
        config: WorkerConfig,
        queue_store: Arc<dyn QueueStore>,
        recorder: Arc<dyn MetricsRecorder>,
        breakers: Arc<CircuitBreakerRegistry>,
        handler: H,
    ) -> Self {
        Self { config, queue_store, recorder, breakers, handler, _payload: PhantomData }
    }

    pub async fn run_once(&self) -> Result<PollSummary, WorkerError> {
        let messages = self
            .queue_store
            .read(&self.config.queue_name, self.config.visibility_timeout_secs, self.config.batch_size)
            .await?;

        let mut summary = PollSummary { polled: messages.len(), ..Default::default() };

        for msg in messages {
            match self.dispatch_one(&msg).await {
                DispatchOutcome::Success => summary.succeeded += 1,
                DispatchOutcome::DeadLettered => summary.dead_lettered += 1,
                DispatchOutcome::LeftForRetry => summary.left_for_retry += 1,
            }
        }

        Ok(summary)
    }

    async fn dispatch_one(&self, msg: &pipeline_db::QueueMessage) -> DispatchOutcome {
        let incoming_trace: Option<TraceContext> = msg
            .message
            .get("traceContext")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let payload = match self.handler.validate_message(&msg.message) {
            Ok(p) => p,
            Err(err) => {
                self.dead_letter(msg, &err).await;
                record_validation_failure(self.recorder.as_ref(), &self.config.queue_name, msg, &err).await;
                return DispatchOutcome::DeadLettered;
            }
        };

        let started = Instant::now();
        let queue_store = self.queue_store.clone();
        let breaker = self
            .breakers
            .get_or_create(format!("queue-{}", self.config.queue_name), CircuitBreakerRegistryOptions::default())
            .await;
        let timeout = match TimeoutPolicy::new(self.config.per_message_timeout) {
            Ok(t) => t,
            Err(_) => TimeoutPolicy::new(Duration::from_secs(30)).expect("30s is always valid"),
        };
        let source_queue = self.config.queue_name.clone();

        let payload = Arc::new(payload);

        let result = trace_operation(
            self.recorder.as_ref(),
            &self.config.service_name,
            &self.config.queue_name,
            incoming_trace,
            |span| {
                let handler = &self.handler;
                async move {
                    let ctx = Arc::new(WorkerContext { queue_store, span, source_queue });
                    breaker
                        .execute(move || {
                            let ctx = ctx.clone();
                            let payload = payload.clone();
                            async move {
                                timeout
                                    .execute(move || {
                                        let ctx = ctx.clone();
                                        let payload = payload.clone();
                                        async move {
                                            handler
                                                .process((*payload).clone(), &ctx)
                                                .await
                                                .map_err(ResilienceError::Inner)
                                        }
                                    })
                                    .await
                            }
                        })
                        .await
                }
            },
        )
        .await;

        let processing_ms = started.elapsed().as_millis() as i64;
        let span_id = current_span_id();

        match result {
            Ok(()) => {
                let _ = self.queue_store.archive(&self.config.queue_name, msg.msg_id).await;
                record_metric(
                    self.recorder.as_ref(),
                    &self.config.queue_name,
                    msg.msg_id,
                    MetricStatus::Success,
                    processing_ms,
                    span_id.as_deref(),
                    serde_json::json!({}),
                )
                .await;
                DispatchOutcome::Success
            }
            Err(resilience_err) => {
                let worker_err = unwrap_resilience_error(resilience_err);
                let category = worker_err.category();

                record_metric(
                    self.recorder.as_ref(),
                    &self.config.queue_name,
                    msg.msg_id,
                    MetricStatus::Error,
                    processing_ms,
                    span_id.as_deref(),
                    worker_err.dlq_details(),
                )
                .await;

                if !category.is_retryable() || msg.read_count >= self.config.max_retries {
                    self.dead_letter(msg, &worker_err).await;
                    DispatchOutcome::DeadLettered
                } else {
                    tracing::warn!(
                        queue = %self.config.queue_name,
                        msg_id = msg.msg_id,
                        read_count = msg.read_count,
                        error = %worker_err,
                        "leaving message unacked for redelivery"
                    );
                    DispatchOutcome::LeftForRetry
                }
            }
        }
    }

    async fn dead_letter(&self, msg: &pipeline_db::QueueMessage, err: &WorkerError) {
        let details = serde_json::json!({
            "category": err.category().to_string(),
            "message": err.to_string(),
            "workerInstance": self.config.worker_instance,
        });
        if let Err(e) = self
            .recorder
            .record_dead_letter(&self.config.queue_name, &msg.message, msg.read_count + 1, details)
            .await
        {
            tracing::error!(error = %e, "failed to record dead letter item");
        }
        let _ = self.queue_store.archive(&self.config.queue_name, msg.msg_id).await;
    }
}

enum DispatchOutcome {
    Success,
    DeadLettered,
    LeftForRetry,
}

fn current_span_id() -> Option<String> {
    crate::trace::current_span().map(|s| s.span_id)
}

fn unwrap_resilience_error(err: ResilienceError<WorkerError>) -> WorkerError {
    match err {
        ResilienceError::Timeout { .. } => WorkerError::Timeout,
        ResilienceError::CircuitOpen { .. } => {
            WorkerError::Transient { reason: "circuit open".into() }
        }
        ResilienceError::Bulkhead { .. } => {
            WorkerError::Transient { reason: "bulkhead rejected".into() }
        }
        ResilienceError::RetryExhausted { mut failures, .. } => failures
            .pop()
            .unwrap_or(WorkerError::Unknown { reason: "retry exhausted".into() }),
        ResilienceError::Inner(e) => e,
    }
}

async fn record_metric(
    recorder: &dyn MetricsRecorder,
    queue: &str,
    msg_id: i64,
    status: MetricStatus,
    processing_ms: i64,
    span_id: Option<&str>,
    details: Value,
) {
    if let Err(e) = recorder.record_metric(queue, msg_id, status, processing_ms, span_id, details).await {
        tracing::error!(error = %e, "failed to record queue metric");
    }
}

async fn record_validation_failure(
    recorder: &dyn MetricsRecorder,
    queue: &str,
    msg: &pipeline_db::QueueMessage,
    err: &WorkerError,
) {
    if let Err(e) = recorder
        .record_validation_report(queue, Some(msg.msg_id), &err.to_string(), Some(msg.message.clone()))
        .await
    {
        tracing::error!(error = %e, "failed to record validation report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_db::InMemoryQueueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct FakePayload {
        value: i32,
    }

    enum Outcome {
        Succeed,
        FailRetryable,
        FailNonRetryable,
    }

    struct FakeHandler {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerHandler<FakePayload> for FakeHandler {
        async fn process(&self, _payload: FakePayload, _ctx: &WorkerContext) -> Result<(), WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Succeed => Ok(()),
                Outcome::FailRetryable => Err(WorkerError::Transient { reason: "boom".into() }),
                Outcome::FailNonRetryable => Err(WorkerError::NotFound { reason: "missing".into() }),
            }
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            queue_name: "test_queue".to_string(),
            service_name: "test-service".to_string(),
            visibility_timeout_secs: 30,
            batch_size: 10,
            max_retries: 3,
            per_message_timeout: Duration::from_secs(5),
            worker_instance: "test-instance".to_string(),
        }
    }

    fn make_worker(
        config: WorkerConfig,
        queue_store: Arc<InMemoryQueueStore>,
        recorder: Arc<crate::metrics::testing::InMemoryMetricsRecorder>,
        handler: FakeHandler,
    ) -> WorkerBase<FakePayload, FakeHandler> {
        WorkerBase::new(
            config,
            queue_store as Arc<dyn QueueStore>,
            recorder as Arc<dyn MetricsRecorder>,
            Arc::new(CircuitBreakerRegistry::new()),
            handler,
        )
    }

    #[tokio::test]
    async fn successful_message_is_archived_and_recorded() {
        let queue_store = Arc::new(InMemoryQueueStore::new());
        queue_store.send("test_queue", &serde_json::json!({ "value": 1 })).await.unwrap();
        let recorder = Arc::new(crate::metrics::testing::InMemoryMetricsRecorder::new());
        let worker = make_worker(
            worker_config(),
            queue_store.clone(),
            recorder.clone(),
            FakeHandler { outcome: Outcome::Succeed, calls: AtomicUsize::new(0) },
        );

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary, PollSummary { polled: 1, succeeded: 1, dead_lettered: 0, left_for_retry: 0 });
        assert_eq!(queue_store.pending_count("test_queue").await.unwrap(), 0);
        assert_eq!(recorder.metrics.lock().unwrap().len(), 1);
        assert!(recorder.spans.lock().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn retryable_failure_under_max_retries_is_left_for_redelivery() {
        let queue_store = Arc::new(InMemoryQueueStore::new());
        queue_store.send("test_queue", &serde_json::json!({ "value": 1 })).await.unwrap();
        let recorder = Arc::new(crate::metrics::testing::InMemoryMetricsRecorder::new());
        let worker = make_worker(
            worker_config(),
            queue_store.clone(),
            recorder.clone(),
            FakeHandler { outcome: Outcome::FailRetryable, calls: AtomicUsize::new(0) },
        );

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.left_for_retry, 1);
        assert_eq!(summary.dead_lettered, 0);
        assert!(recorder.dead_letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_at_max_retries_is_dead_lettered() {
        let queue_store = Arc::new(InMemoryQueueStore::new());
        queue_store.send("test_queue", &serde_json::json!({ "value": 1 })).await.unwrap();
        let recorder = Arc::new(crate::metrics::testing::InMemoryMetricsRecorder::new());
        let mut config = worker_config();
        config.max_retries = 0;
        let worker = make_worker(
            config,
            queue_store.clone(),
            recorder.clone(),
            FakeHandler { outcome: Outcome::FailRetryable, calls: AtomicUsize::new(0) },
        );

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(recorder.dead_letters.lock().unwrap().len(), 1);
        assert_eq!(queue_store.pending_count("test_queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_dead_lettered_immediately() {
        let queue_store = Arc::new(InMemoryQueueStore::new());
        queue_store.send("test_queue", &serde_json::json!({ "value": 1 })).await.unwrap();
        let recorder = Arc::new(crate::metrics::testing::InMemoryMetricsRecorder::new());
        let worker = make_worker(
            worker_config(),
            queue_store.clone(),
            recorder.clone(),
            FakeHandler { outcome: Outcome::FailNonRetryable, calls: AtomicUsize::new(0) },
        );

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(queue_store.pending_count("test_queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn schema_validation_failure_dead_letters_without_calling_handler() {
        let queue_store = Arc::new(InMemoryQueueStore::new());
        queue_store.send("test_queue", &serde_json::json!({ "not_value": "oops" })).await.unwrap();
        let recorder = Arc::new(crate::metrics::testing::InMemoryMetricsRecorder::new());
        let worker = make_worker(
            worker_config(),
            queue_store.clone(),
            recorder.clone(),
            FakeHandler { outcome: Outcome::Succeed, calls: AtomicUsize::new(0) },
        );

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(recorder.validation_reports.lock().unwrap().len(), 1);
    }
}
