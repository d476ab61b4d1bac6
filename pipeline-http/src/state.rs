//! Shared application state: one [`WorkerBase`] per stage plus the handles
//! HTTP-level admin/seed operations need directly (the queue store, the
//! outbound-call backpressure semaphore of spec §9).

use std::sync::Arc;

use tokio::sync::Semaphore;

use pipeline_core::config::Config;
use pipeline_db::QueueStore;
use pipeline_stages::handlers::{AlbumHandler, ArtistHandler, ProducerHandler, SocialHandler, TrackHandler};
use pipeline_stages::models::{AlbumMessage, ArtistMessage, ProducerMessage, SocialMessage, TrackMessage};
use pipeline_worker::WorkerBase;

pub struct AppState {
    pub config: Arc<Config>,
    pub queue_store: Arc<dyn QueueStore>,
    /// Caps concurrent HTTP-triggered work that fans out to external APIs
    /// (spec §9 "Backpressure & concurrency cap").
    pub http_semaphore: Arc<Semaphore>,
    pub artist: WorkerBase<ArtistMessage, ArtistHandler>,
    pub album: WorkerBase<AlbumMessage, AlbumHandler>,
    pub track: WorkerBase<TrackMessage, TrackHandler>,
    pub producer: WorkerBase<ProducerMessage, ProducerHandler>,
    pub social: WorkerBase<SocialMessage, SocialHandler>,
}

/// Maps a URL path segment to its queue name (spec §3 "Queue message"). The
/// two happen to be spelled identically today; kept distinct since the HTTP
/// surface and the queue namespace are allowed to diverge.
pub fn queue_name_for_stage(stage: &str) -> Option<&'static str> {
    match stage {
        "artist" => Some(pipeline_stages::queues::ARTIST_QUEUE),
        "album" => Some(pipeline_stages::queues::ALBUM_QUEUE),
        "track" => Some(pipeline_stages::queues::TRACK_QUEUE),
        "producer" => Some(pipeline_stages::queues::PRODUCER_QUEUE),
        "social" => Some(pipeline_stages::queues::SOCIAL_QUEUE),
        _ => None,
    }
}
