//! Concrete stage handlers (A–E), each a thin [`pipeline_worker::WorkerHandler`]
//! adapter around the domain logic in [`crate::repo`]/[`crate::client`].

mod album;
mod artist;
mod producer;
mod social;
mod track;

pub use album::AlbumHandler;
pub use artist::ArtistHandler;
pub use producer::ProducerHandler;
pub use social::SocialHandler;
pub use track::TrackHandler;

use serde::Serialize;

use pipeline_worker::{WorkerContext, WorkerError};

use crate::error::StageError;

/// Batch caps (spec §4.8 "Batching"): trim with a warning rather than risk
/// blowing the per-message timeout.
pub const MAX_PRODUCERS_PER_MESSAGE: usize = 25;
pub const MAX_ENRICHMENT_FANOUTS_PER_MESSAGE: usize = 10;

pub(crate) async fn enqueue(ctx: &WorkerContext, queue: &str, payload: impl Serialize) -> Result<i64, StageError> {
    ctx.enqueue(queue, payload).await.map_err(worker_err_to_stage_err)
}

fn worker_err_to_stage_err(err: WorkerError) -> StageError {
    StageError::Transient { reason: format!("enqueue failed: {err}") }
}
