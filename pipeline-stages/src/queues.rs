//! Canonical queue names, one per stage (spec §2 "A → B → C → D → E").

pub const ARTIST_QUEUE: &str = "artist";
pub const ALBUM_QUEUE: &str = "album";
pub const TRACK_QUEUE: &str = "track";
pub const PRODUCER_QUEUE: &str = "producer";
pub const SOCIAL_QUEUE: &str = "social";
