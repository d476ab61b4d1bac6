//! Stage A (spec §4.8 table row 1): resolve an artist by id or name, upsert,
//! and seed album enumeration at offset 0.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use pipeline_worker::{WorkerContext, WorkerError, WorkerHandler};

use crate::client::SpotifyClient;
use crate::error::StageError;
use crate::handlers::enqueue;
use crate::models::{AlbumMessage, ArtistMessage};
use crate::queues::ALBUM_QUEUE;

pub struct ArtistHandler {
    spotify: Arc<dyn SpotifyClient>,
    pool: PgPool,
}

impl ArtistHandler {
    pub fn new(spotify: Arc<dyn SpotifyClient>, pool: PgPool) -> Self {
        Self { spotify, pool }
    }

    async fn handle(&self, payload: ArtistMessage, ctx: &WorkerContext) -> Result<(), StageError> {
        let artist_spotify_id = match payload.artist_id {
            Some(id) => id,
            None => {
                let name = payload
                    .artist_name
                    .ok_or_else(|| StageError::Validation { reason: "artistId or artistName required".into() })?;
                self.spotify.resolve_artist_by_name(&name).await?
            }
        };

        let name = self.spotify.artist_name(&artist_spotify_id).await?;
        crate::repo::upsert_artist(&self.pool, &artist_spotify_id, &name).await?;

        enqueue(ctx, ALBUM_QUEUE, AlbumMessage { artist_id: artist_spotify_id, offset: 0 }).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerHandler<ArtistMessage> for ArtistHandler {
    async fn process(&self, payload: ArtistMessage, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.handle(payload, ctx).await.map_err(pipeline_worker::IntoWorkerError::into_worker_error)
    }

    fn validate_message(&self, raw: &Value) -> Result<ArtistMessage, WorkerError> {
        let msg: ArtistMessage = serde_json::from_value(raw.clone())
            .map_err(|e| WorkerError::Validation { reason: e.to_string() })?;
        if msg.artist_id.is_none() && msg.artist_name.is_none() {
            return Err(WorkerError::Validation {
                reason: "at least one of artistId/artistName is required".into(),
            });
        }
        Ok(msg)
    }
}
