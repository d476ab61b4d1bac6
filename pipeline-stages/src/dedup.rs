//! Dedup rules (spec §4.8 "Dedup rules"): pure predicates over external items,
//! kept free of I/O so they're trivial to unit test against fixture data.

use crate::models::{AlbumGroup, ArtistCredit, ExternalAlbum, ExternalTrack};

/// The first entry in an item's `artists` array owns it (spec GLOSSARY
/// "Primary artist"); everything else is a collaborator credit.
pub fn is_primary_artist(artists: &[ArtistCredit], artist_spotify_id: &str) -> bool {
    artists.first().map(|a| a.spotify_id == artist_spotify_id).unwrap_or(false)
}

/// Skip non-primary-artist releases and compilations / "appears on" credits.
pub fn should_skip_album(album: &ExternalAlbum, artist_spotify_id: &str) -> bool {
    if !is_primary_artist(&album.artists, artist_spotify_id) {
        return true;
    }
    matches!(album.album_group, AlbumGroup::Compilation | AlbumGroup::AppearsOn)
}

/// Skip non-primary-artist tracks. Normalized-name uniqueness within an
/// artist's catalog is enforced by the `normalized_tracks` unique index, not
/// here — this only covers the ownership check.
pub fn should_skip_track(track: &ExternalTrack, artist_spotify_id: &str) -> bool {
    !is_primary_artist(&track.artists, artist_spotify_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(id: &str) -> ArtistCredit {
        ArtistCredit { spotify_id: id.into(), name: id.into() }
    }

    #[test]
    fn primary_artist_owns_item_when_first_in_credits() {
        let artists = vec![credit("A"), credit("B")];
        assert!(is_primary_artist(&artists, "A"));
        assert!(!is_primary_artist(&artists, "B"));
    }

    #[test]
    fn skips_compilation_albums() {
        let album = ExternalAlbum {
            spotify_id: "al1".into(),
            name: "Greatest Hits".into(),
            release_date: None,
            artists: vec![credit("A")],
            album_group: AlbumGroup::Compilation,
        };
        assert!(should_skip_album(&album, "A"));
    }

    #[test]
    fn skips_appears_on_albums() {
        let album = ExternalAlbum {
            spotify_id: "al2".into(),
            name: "Collab".into(),
            release_date: None,
            artists: vec![credit("A")],
            album_group: AlbumGroup::AppearsOn,
        };
        assert!(should_skip_album(&album, "A"));
    }

    #[test]
    fn skips_non_primary_artist_album() {
        let album = ExternalAlbum {
            spotify_id: "al3".into(),
            name: "Feature".into(),
            release_date: None,
            artists: vec![credit("B"), credit("A")],
            album_group: AlbumGroup::Album,
        };
        assert!(should_skip_album(&album, "A"));
    }

    #[test]
    fn keeps_primary_artist_studio_album() {
        let album = ExternalAlbum {
            spotify_id: "al4".into(),
            name: "Solo".into(),
            release_date: Some("2020".into()),
            artists: vec![credit("A")],
            album_group: AlbumGroup::Album,
        };
        assert!(!should_skip_album(&album, "A"));
    }

    #[test]
    fn skips_non_primary_artist_track() {
        let track = ExternalTrack {
            spotify_id: "t1".into(),
            name: "Feature".into(),
            duration_ms: 1000,
            artists: vec![credit("B"), credit("A")],
        };
        assert!(should_skip_track(&track, "A"));
    }
}
