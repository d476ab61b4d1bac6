//! Stage E (spec §4.8 table row 5): fetch a producer's social profile and
//! merge it into `producers.metadata`. Terminal stage, no downstream enqueue.
//! A missing profile degrades gracefully rather than failing the message
//! (spec §7: Genius `NotFound` on social lookup is not an error).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use pipeline_worker::{WorkerContext, WorkerError, WorkerHandler};

use crate::client::GeniusClient;
use crate::error::StageError;
use crate::models::SocialMessage;

pub struct SocialHandler {
    genius: Arc<dyn GeniusClient>,
    pool: PgPool,
}

impl SocialHandler {
    pub fn new(genius: Arc<dyn GeniusClient>, pool: PgPool) -> Self {
        Self { genius, pool }
    }

    async fn handle(&self, payload: SocialMessage, _ctx: &WorkerContext) -> Result<(), StageError> {
        let producer_id = Uuid::parse_str(&payload.producer_id)
            .map_err(|_| StageError::Validation { reason: "producerId is not a valid uuid".into() })?;

        let profile = self.genius.social_profile(&payload.producer_name).await?;

        let metadata: Value = match profile {
            Some(p) => serde_json::json!({
                "instagramHandle": p.instagram_handle,
                "instagramUrl": p.instagram_url,
                "bio": p.bio,
                "enrichmentFailed": false,
            }),
            None => {
                tracing::debug!(producer = %payload.producer_name, "no social profile found, recording degraded enrichment");
                serde_json::json!({
                    "instagramHandle": Value::Null,
                    "instagramUrl": Value::Null,
                    "bio": Value::Null,
                    "enrichmentFailed": true,
                })
            }
        };

        crate::repo::merge_social_metadata(&self.pool, producer_id, metadata).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerHandler<SocialMessage> for SocialHandler {
    async fn process(&self, payload: SocialMessage, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.handle(payload, ctx).await.map_err(pipeline_worker::IntoWorkerError::into_worker_error)
    }
}
