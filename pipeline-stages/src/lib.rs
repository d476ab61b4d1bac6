//! Domain stage handlers for the artist → album → track → producer → social
//! enrichment chain (spec §4.8): message shapes, dedup/normalization rules,
//! external API client contracts, domain-write helpers, and the five
//! concrete [`pipeline_worker::WorkerHandler`] implementations.

pub mod client;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod queues;
pub mod repo;

pub use error::StageError;
pub use handlers::{AlbumHandler, ArtistHandler, ProducerHandler, SocialHandler, TrackHandler};
