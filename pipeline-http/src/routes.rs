//! One route pair per stage (spec §6.1): `GET /<stage>/health` and
//! `POST /<stage>`, the latter dispatching on body shape to reset/seed/tick.
//! CORS preflight (`OPTIONS *`) is handled by the [`tower_http::cors`] layer
//! installed in `main`, not by a handler here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};

use pipeline_stages::models::ArtistMessage;
use pipeline_worker::PollSummary;

use crate::state::{queue_name_for_stage, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{stage}/health", get(health))
        .route("/{stage}", post(post_stage))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>, Path(stage): Path<String>) -> impl IntoResponse {
    let Some(queue) = queue_name_for_stage(&stage) else {
        return not_found_stage(&stage);
    };

    match state.queue_store.pending_count(queue).await {
        Ok(pending) => (
            StatusCode::OK,
            Json(json!({
                "queue": queue,
                "pending": pending,
                "visibilityTimeoutSecs": state.config.visibility_timeout_secs,
            })),
        )
            .into_response(),
        Err(err) => error_response(&err.to_string(), None),
    }
}

async fn post_stage(
    State(state): State<Arc<AppState>>,
    Path(stage): Path<String>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let Some(queue) = queue_name_for_stage(&stage) else {
        return not_found_stage(&stage);
    };
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);

    if body.get("action").and_then(Value::as_str) == Some("reset") {
        return match state.queue_store.drop_and_recreate(queue).await {
            Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
            Err(err) => error_response(&err.to_string(), None),
        };
    }

    if stage == "artist" && is_domain_seed_body(&body) {
        return seed_artist(&state, body).await;
    }

    tick(&state, &stage).await
}

/// Stage A only accepts a domain body: `{artistId}` or `{artistName}`.
fn is_domain_seed_body(body: &Value) -> bool {
    body.get("artistId").is_some() || body.get("artistName").is_some()
}

async fn seed_artist(state: &AppState, body: Value) -> axum::response::Response {
    let _permit = match state.http_semaphore.clone().acquire_owned().await {
        Ok(p) => p,
        Err(_) => return error_response("http semaphore closed", None),
    };

    let message: ArtistMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => return error_response("invalid seed body", Some(json!({ "reason": e.to_string() }))),
    };
    if message.artist_id.is_none() && message.artist_name.is_none() {
        return error_response("artistId or artistName is required", None);
    }

    let message = match serde_json::to_value(&message) {
        Ok(v) => v,
        Err(e) => return error_response("failed to serialize seed message", Some(json!({ "reason": e.to_string() }))),
    };

    // No incoming trace context: the worker treats this as the root of a new
    // trace the first time it reads the message (spec §8 scenario 6).
    match state.queue_store.send(pipeline_stages::queues::ARTIST_QUEUE, &message).await {
        Ok(msg_id) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": format!("queued artist seed as message {msg_id}") })),
        )
            .into_response(),
        Err(err) => error_response(&err.to_string(), None),
    }
}

async fn tick(state: &AppState, stage: &str) -> axum::response::Response {
    let _permit = match state.http_semaphore.clone().acquire_owned().await {
        Ok(p) => p,
        Err(_) => return error_response("http semaphore closed", None),
    };

    let result = match stage {
        "artist" => state.artist.run_once().await,
        "album" => state.album.run_once().await,
        "track" => state.track.run_once().await,
        "producer" => state.producer.run_once().await,
        "social" => state.social.run_once().await,
        _ => return not_found_stage(stage),
    };

    // Ticks always return 200 `success:true`; per-message failures already
    // landed in DLQ/metrics inside `run_once` (spec §7 "User-visible behavior").
    match result {
        Ok(summary) => (StatusCode::OK, Json(tick_response(&summary))).into_response(),
        Err(err) => error_response(&err.to_string(), None),
    }
}

fn tick_response(summary: &PollSummary) -> Value {
    json!({
        "success": true,
        "polled": summary.polled,
        "succeeded": summary.succeeded,
        "deadLettered": summary.dead_lettered,
        "leftForRetry": summary.left_for_retry,
    })
}

fn not_found_stage(stage: &str) -> axum::response::Response {
    error_response_with_status(StatusCode::NOT_FOUND, &format!("unknown stage '{stage}'"), None)
}

fn error_response(message: &str, details: Option<Value>) -> axum::response::Response {
    error_response_with_status(StatusCode::INTERNAL_SERVER_ERROR, message, details)
}

fn error_response_with_status(status: StatusCode, message: &str, details: Option<Value>) -> axum::response::Response {
    let mut body = json!({ "error": message });
    if let Some(details) = details {
        body["details"] = details;
    }
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_artist_id_seed_body() {
        assert!(is_domain_seed_body(&json!({ "artistId": "abc" })));
    }

    #[test]
    fn recognizes_artist_name_seed_body() {
        assert!(is_domain_seed_body(&json!({ "artistName": "Drake" })));
    }

    #[test]
    fn empty_body_is_not_a_seed_body() {
        assert!(!is_domain_seed_body(&Value::Null));
        assert!(!is_domain_seed_body(&json!({})));
    }

    #[test]
    fn reset_action_is_not_a_seed_body() {
        assert!(!is_domain_seed_body(&json!({ "action": "reset" })));
    }
}
