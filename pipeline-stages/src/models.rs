//! Queue message payloads (spec §3 "Queue message") and the external-API DTOs
//! stage handlers decode responses into.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistMessage {
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumMessage {
    pub artist_id: String,
    /// Page offset in page-size units, per the framework's "pass-through,
    /// not interpreted" pagination contract (spec §4.8 table, Open Question c).
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMessage {
    pub album_spotify_id: String,
    pub album_uuid: String,
    pub album_name: String,
    pub artist_spotify_id: String,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerMessage {
    pub track_spotify_id: String,
    pub track_uuid: String,
    pub track_name: String,
    pub album_spotify_id: String,
    pub artist_spotify_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMessage {
    pub producer_id: String,
    pub producer_name: String,
}

/// One artist credit on an external album/track item. Only the first entry
/// (spec's "primary artist") owns the item for dedup purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistCredit {
    pub spotify_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumGroup {
    Album,
    Single,
    Compilation,
    AppearsOn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAlbum {
    pub spotify_id: String,
    pub name: String,
    pub release_date: Option<String>,
    pub artists: Vec<ArtistCredit>,
    pub album_group: AlbumGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTrack {
    pub spotify_id: String,
    pub name: String,
    pub duration_ms: i32,
    pub artists: Vec<ArtistCredit>,
}

/// One page of a paginated external listing (albums or tracks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerCredit {
    pub name: String,
    pub source: String,
    pub confidence: f32,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SocialProfile {
    pub instagram_handle: Option<String>,
    pub instagram_url: Option<String>,
    pub bio: Option<String>,
}
