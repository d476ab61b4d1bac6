//! Stage C (spec §4.8 table row 3): enumerate an album's tracks, enforce the
//! `(artistId, normalizedName)` dedup key, fan out producer-identification
//! messages, and continue pagination.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use pipeline_worker::{WorkerContext, WorkerError, WorkerHandler};

use crate::client::SpotifyClient;
use crate::dedup;
use crate::error::StageError;
use crate::handlers::enqueue;
use crate::models::{ProducerMessage, TrackMessage};
use crate::normalize;
use crate::queues::{PRODUCER_QUEUE, TRACK_QUEUE};

pub struct TrackHandler {
    spotify: Arc<dyn SpotifyClient>,
    pool: PgPool,
}

impl TrackHandler {
    pub fn new(spotify: Arc<dyn SpotifyClient>, pool: PgPool) -> Self {
        Self { spotify, pool }
    }

    async fn handle(&self, payload: TrackMessage, ctx: &WorkerContext) -> Result<(), StageError> {
        let album_uuid = Uuid::parse_str(&payload.album_uuid)
            .map_err(|_| StageError::Validation { reason: "albumUuid is not a valid uuid".into() })?;

        let album = crate::repo::find_album_by_uuid(&self.pool, album_uuid)
            .await?
            .ok_or_else(|| StageError::MissingRecord { reason: format!("album {} not found", payload.album_uuid) })?;
        let artist = crate::repo::find_artist_by_spotify_id(&self.pool, &payload.artist_spotify_id)
            .await?
            .ok_or_else(|| {
                StageError::MissingRecord { reason: format!("artist {} not found", payload.artist_spotify_id) }
            })?;

        let offset = payload.offset.unwrap_or(0);
        let page = self.spotify.list_tracks(&payload.album_spotify_id, offset).await?;

        for track in &page.items {
            if dedup::should_skip_track(track, &payload.artist_spotify_id) {
                continue;
            }

            let row = crate::repo::upsert_track(&self.pool, &track.spotify_id, album.id, &track.name, track.duration_ms)
                .await?;

            let normalized_name = normalize::normalize(&track.name);
            let claimed =
                crate::repo::claim_normalized_track(&self.pool, artist.id, &normalized_name, row.id).await?;
            if !claimed {
                tracing::debug!(track = %track.spotify_id, normalized_name, "track dedup key already claimed, skipping fan-out");
                continue;
            }

            enqueue(
                ctx,
                PRODUCER_QUEUE,
                ProducerMessage {
                    track_spotify_id: track.spotify_id.clone(),
                    track_uuid: row.id.to_string(),
                    track_name: track.name.clone(),
                    album_spotify_id: payload.album_spotify_id.clone(),
                    artist_spotify_id: payload.artist_spotify_id.clone(),
                },
            )
            .await?;
        }

        if let Some(next_offset) = page.next_offset {
            enqueue(ctx, TRACK_QUEUE, TrackMessage { offset: Some(next_offset), ..payload }).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkerHandler<TrackMessage> for TrackHandler {
    async fn process(&self, payload: TrackMessage, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.handle(payload, ctx).await.map_err(pipeline_worker::IntoWorkerError::into_worker_error)
    }
}
