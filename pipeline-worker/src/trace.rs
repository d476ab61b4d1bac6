//! Span propagation across stages (spec §4.6), carried explicitly through a
//! task-local rather than serialized handler closures (§9 "Cross-worker trace
//! flow"): a span id travels in the outgoing queue message, not as captured state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

use pipeline_db::DbError;

use crate::metrics::MetricsRecorder;

/// The envelope every queue message carries alongside its typed payload, so
/// spans across stage boundaries link into one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
}

impl TraceContext {
    /// Derive the context a downstream message should carry: same trace, new
    /// span, parented to the current one.
    pub fn child(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id.clone(),
            span_id: new_id(),
            parent_id: Some(self.span_id.clone()),
        }
    }

    fn root() -> TraceContext {
        TraceContext { trace_id: new_id(), span_id: new_id(), parent_id: None }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

tokio::task_local! {
    static CURRENT_SPAN: TraceContext;
}

/// The current span, if `trace_operation` has an ancestor frame on this task.
pub fn current_span() -> Option<TraceContext> {
    CURRENT_SPAN.try_with(|ctx| ctx.clone()).ok()
}

/// Open a span named `operation` (within `service`), run `fn_`, and persist
/// `{traceId, spanId, parentId, service, operation, timestampStart, durationMs,
/// status, attributes, errorFields?}` on completion — success or failure. Pops
/// back to the prior span when `fn_` returns, even on error, since the
/// task-local is scoped to the `with_current_span`/closure lifetime and not
/// mutated in place.
pub async fn trace_operation<T, E, Fut>(
    recorder: &dyn MetricsRecorder,
    service: &str,
    operation: &str,
    incoming: Option<TraceContext>,
    fn_: impl FnOnce(TraceContext) -> Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let parent = incoming.clone();
    let span = match &parent {
        Some(p) => p.child(),
        None => TraceContext::root(),
    };

    let start = Utc::now();
    let result = CURRENT_SPAN
        .scope(span.clone(), {
            let span = span.clone();
            async move { fn_(span).await }
        })
        .await;
    let duration_ms = (Utc::now() - start).num_milliseconds().max(0);

    let (status, error_fields) = match &result {
        Ok(_) => (Some("success"), None),
        Err(e) => (Some("error"), Some(serde_json::json!({ "message": e.to_string() }))),
    };

    if let Err(err) = persist_span(
        recorder,
        &span,
        service,
        operation,
        start,
        duration_ms,
        status,
        error_fields,
    )
    .await
    {
        tracing::warn!(error = %err, "failed to persist trace span");
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn persist_span(
    recorder: &dyn MetricsRecorder,
    span: &TraceContext,
    service: &str,
    operation: &str,
    start: DateTime<Utc>,
    duration_ms: i64,
    status: Option<&str>,
    error_fields: Option<serde_json::Value>,
) -> Result<(), DbError> {
    recorder
        .record_trace_span(
            &span.trace_id,
            &span.span_id,
            span.parent_id.as_deref(),
            service,
            operation,
            start,
            Some(duration_ms),
            status,
            error_fields,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_preserves_trace_id_and_sets_parent() {
        let root = TraceContext::root();
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_id, Some(root.span_id.clone()));
        assert_ne!(child.span_id, root.span_id);
    }

    #[tokio::test]
    async fn current_span_is_none_outside_any_operation() {
        assert!(current_span().is_none());
    }
}
