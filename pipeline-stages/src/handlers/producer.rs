//! Stage D (spec §4.8 table row 4): identify producer credits for a track via
//! Genius, merge same-named credits by highest confidence, persist, and fan
//! out social-enrichment messages (capped per spec's batching rule).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use pipeline_worker::{WorkerContext, WorkerError, WorkerHandler};

use crate::client::{GeniusClient, SpotifyClient};
use crate::error::StageError;
use crate::handlers::{enqueue, MAX_ENRICHMENT_FANOUTS_PER_MESSAGE, MAX_PRODUCERS_PER_MESSAGE};
use crate::models::{ProducerMessage, SocialMessage};
use crate::normalize;
use crate::queues::SOCIAL_QUEUE;

pub struct ProducerHandler {
    spotify: Arc<dyn SpotifyClient>,
    genius: Arc<dyn GeniusClient>,
    pool: PgPool,
}

impl ProducerHandler {
    pub fn new(spotify: Arc<dyn SpotifyClient>, genius: Arc<dyn GeniusClient>, pool: PgPool) -> Self {
        Self { spotify, genius, pool }
    }

    async fn handle(&self, payload: ProducerMessage, ctx: &WorkerContext) -> Result<(), StageError> {
        let track_uuid = Uuid::parse_str(&payload.track_uuid)
            .map_err(|_| StageError::Validation { reason: "trackUuid is not a valid uuid".into() })?;

        let track = crate::repo::find_track_by_uuid(&self.pool, track_uuid)
            .await?
            .ok_or_else(|| StageError::MissingRecord { reason: format!("track {} not found", payload.track_uuid) })?;

        let artist_name = self.spotify.artist_name(&payload.artist_spotify_id).await?;
        let mut credits = self.genius.find_producers(&payload.track_name, &artist_name).await?;

        if credits.len() > MAX_PRODUCERS_PER_MESSAGE {
            tracing::warn!(
                track = %payload.track_spotify_id,
                found = credits.len(),
                cap = MAX_PRODUCERS_PER_MESSAGE,
                "trimming producer credits to batch cap"
            );
            credits.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
            credits.truncate(MAX_PRODUCERS_PER_MESSAGE);
        }

        // Same producer proposed by multiple sources: keep the highest confidence one.
        let mut by_name = HashMap::new();
        for credit in credits {
            let key = normalize::normalize(&credit.name);
            by_name
                .entry(key)
                .and_modify(|existing: &mut crate::models::ProducerCredit| {
                    if credit.confidence > existing.confidence {
                        *existing = credit.clone();
                    }
                })
                .or_insert(credit);
        }

        let mut producer_rows = Vec::new();
        for (normalized_name, credit) in by_name {
            let metadata = serde_json::json!({
                "role": {"value": "producer", "confidence": credit.confidence, "source": credit.source},
                "externalId": credit.external_id,
            });
            let row = crate::repo::upsert_producer(&self.pool, &normalized_name, &credit.name, metadata).await?;
            crate::repo::attribute_track_producer(&self.pool, track.id, row.id, &credit.source, credit.confidence)
                .await?;
            producer_rows.push(row);
        }

        if producer_rows.len() > MAX_ENRICHMENT_FANOUTS_PER_MESSAGE {
            tracing::warn!(
                track = %payload.track_spotify_id,
                found = producer_rows.len(),
                cap = MAX_ENRICHMENT_FANOUTS_PER_MESSAGE,
                "trimming social enrichment fan-out to batch cap"
            );
            producer_rows.truncate(MAX_ENRICHMENT_FANOUTS_PER_MESSAGE);
        }

        for producer in producer_rows {
            enqueue(
                ctx,
                SOCIAL_QUEUE,
                SocialMessage { producer_id: producer.id.to_string(), producer_name: producer.display_name },
            )
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkerHandler<ProducerMessage> for ProducerHandler {
    async fn process(&self, payload: ProducerMessage, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.handle(payload, ctx).await.map_err(pipeline_worker::IntoWorkerError::into_worker_error)
    }
}
