//! Stage B (spec §4.8 table row 2): enumerate an artist's albums, skip
//! non-primary/compilation releases, fan out one track-enumeration message
//! per kept album, and continue pagination.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use pipeline_worker::{WorkerContext, WorkerError, WorkerHandler};

use crate::client::SpotifyClient;
use crate::dedup;
use crate::error::StageError;
use crate::handlers::enqueue;
use crate::models::{AlbumMessage, TrackMessage};
use crate::normalize;
use crate::queues::{ALBUM_QUEUE, TRACK_QUEUE};

pub struct AlbumHandler {
    spotify: Arc<dyn SpotifyClient>,
    pool: PgPool,
}

impl AlbumHandler {
    pub fn new(spotify: Arc<dyn SpotifyClient>, pool: PgPool) -> Self {
        Self { spotify, pool }
    }

    async fn handle(&self, payload: AlbumMessage, ctx: &WorkerContext) -> Result<(), StageError> {
        let artist = crate::repo::find_artist_by_spotify_id(&self.pool, &payload.artist_id)
            .await?
            .ok_or_else(|| StageError::MissingRecord { reason: format!("artist {} not found", payload.artist_id) })?;

        let page = self.spotify.list_albums(&payload.artist_id, payload.offset).await?;

        for album in &page.items {
            if dedup::should_skip_album(album, &payload.artist_id) {
                continue;
            }

            let release_date = album.release_date.as_deref().and_then(normalize::parse_release_date);
            let row =
                crate::repo::upsert_album(&self.pool, &album.spotify_id, artist.id, &album.name, release_date)
                    .await?;

            enqueue(
                ctx,
                TRACK_QUEUE,
                TrackMessage {
                    album_spotify_id: album.spotify_id.clone(),
                    album_uuid: row.id.to_string(),
                    album_name: album.name.clone(),
                    artist_spotify_id: payload.artist_id.clone(),
                    offset: None,
                },
            )
            .await?;
        }

        if let Some(next_offset) = page.next_offset {
            enqueue(ctx, ALBUM_QUEUE, AlbumMessage { artist_id: payload.artist_id, offset: next_offset }).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkerHandler<AlbumMessage> for AlbumHandler {
    async fn process(&self, payload: AlbumMessage, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.handle(payload, ctx).await.map_err(pipeline_worker::IntoWorkerError::into_worker_error)
    }
}
