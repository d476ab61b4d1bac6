//! Domain writes (spec §4.8 "Domain writes use `safeUpsert`"), one function
//! per entity, each routed through [`pipeline_db::safe_upsert`] so concurrent
//! redeliveries racing on the same external id settle on one row.

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use pipeline_db::models::{Artist, Album, NormalizedTrack, Producer, Track};
use pipeline_db::{safe_upsert, with_transaction, DbError};

pub async fn upsert_artist(pool: &PgPool, spotify_id: &str, name: &str) -> Result<Artist, DbError> {
    safe_upsert(
        || async {
            sqlx::query_as::<_, Artist>(
                "insert into artists (spotify_id, name) values ($1, $2) returning *",
            )
            .bind(spotify_id)
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(DbError::classify)
        },
        || async {
            sqlx::query_as::<_, Artist>("select * from artists where spotify_id = $1")
                .bind(spotify_id)
                .fetch_one(pool)
                .await
                .map_err(DbError::classify)
        },
    )
    .await
}

pub async fn upsert_album(
    pool: &PgPool,
    spotify_id: &str,
    artist_id: Uuid,
    name: &str,
    release_date: Option<NaiveDate>,
) -> Result<Album, DbError> {
    safe_upsert(
        || async {
            sqlx::query_as::<_, Album>(
                "insert into albums (spotify_id, artist_id, name, release_date) values ($1, $2, $3, $4) returning *",
            )
            .bind(spotify_id)
            .bind(artist_id)
            .bind(name)
            .bind(release_date)
            .fetch_one(pool)
            .await
            .map_err(DbError::classify)
        },
        || async {
            sqlx::query_as::<_, Album>("select * from albums where spotify_id = $1")
                .bind(spotify_id)
                .fetch_one(pool)
                .await
                .map_err(DbError::classify)
        },
    )
    .await
}

pub async fn find_artist_by_spotify_id(pool: &PgPool, spotify_id: &str) -> Result<Option<Artist>, DbError> {
    sqlx::query_as::<_, Artist>("select * from artists where spotify_id = $1")
        .bind(spotify_id)
        .fetch_optional(pool)
        .await
        .map_err(DbError::classify)
}

pub async fn find_album_by_uuid(pool: &PgPool, album_uuid: Uuid) -> Result<Option<Album>, DbError> {
    sqlx::query_as::<_, Album>("select * from albums where id = $1")
        .bind(album_uuid)
        .fetch_optional(pool)
        .await
        .map_err(DbError::classify)
}

pub async fn upsert_track(
    pool: &PgPool,
    spotify_id: &str,
    album_id: Uuid,
    name: &str,
    duration_ms: i32,
) -> Result<Track, DbError> {
    safe_upsert(
        || async {
            sqlx::query_as::<_, Track>(
                "insert into tracks (spotify_id, album_id, name, duration_ms) values ($1, $2, $3, $4) returning *",
            )
            .bind(spotify_id)
            .bind(album_id)
            .bind(name)
            .bind(duration_ms)
            .fetch_one(pool)
            .await
            .map_err(DbError::classify)
        },
        || async {
            sqlx::query_as::<_, Track>("select * from tracks where spotify_id = $1")
                .bind(spotify_id)
                .fetch_one(pool)
                .await
                .map_err(DbError::classify)
        },
    )
    .await
}

/// Returns `true` if `normalized_name` was newly claimed for this artist
/// (spec's dedup key), `false` if another track already holds it.
pub async fn claim_normalized_track(
    pool: &PgPool,
    artist_id: Uuid,
    normalized_name: &str,
    representative_track_id: Uuid,
) -> Result<bool, DbError> {
    let result = sqlx::query_as::<_, NormalizedTrack>(
        "insert into normalized_tracks (artist_id, normalized_name, representative_track_id)
         values ($1, $2, $3)
         on conflict (artist_id, normalized_name) do nothing
         returning *",
    )
    .bind(artist_id)
    .bind(normalized_name)
    .bind(representative_track_id)
    .fetch_optional(pool)
    .await
    .map_err(DbError::classify)?;

    Ok(result.is_some())
}

pub async fn find_track_by_uuid(pool: &PgPool, track_uuid: Uuid) -> Result<Option<Track>, DbError> {
    sqlx::query_as::<_, Track>("select * from tracks where id = $1")
        .bind(track_uuid)
        .fetch_optional(pool)
        .await
        .map_err(DbError::classify)
}

/// Upsert a producer by normalized name, applying Open Question (a)'s
/// "highest confidence wins" rule for `metadata` while preserving the
/// first-seen `created_at` unconditionally.
///
/// The insert and the merge-update each settle the `normalized_name` race in
/// one atomic statement (`on conflict do nothing`, then a row-locked
/// read-merge-write), so two `ProducerHandler`s crediting the same producer
/// concurrently can't clobber each other's higher-confidence fields the way a
/// bare select-then-update would.
pub async fn upsert_producer(
    pool: &PgPool,
    normalized_name: &str,
    display_name: &str,
    metadata: serde_json::Value,
) -> Result<Producer, DbError> {
    let inserted = sqlx::query_as::<_, Producer>(
        "insert into producers (normalized_name, display_name, metadata) values ($1, $2, $3)
         on conflict (normalized_name) do nothing
         returning *",
    )
    .bind(normalized_name)
    .bind(display_name)
    .bind(&metadata)
    .fetch_optional(pool)
    .await
    .map_err(DbError::classify)?;

    if let Some(row) = inserted {
        return Ok(row);
    }

    // Row already existed (or a concurrent insert just won it): merge under a
    // row lock so the read-then-write isn't racing another credit for the
    // same producer.
    let normalized_name = normalized_name.to_string();
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let row = sqlx::query_as::<_, Producer>("select * from producers where normalized_name = $1 for update")
                .bind(&normalized_name)
                .fetch_one(&mut **tx)
                .await
                .map_err(DbError::classify)?;

            let merged = merge_producer_metadata(&row.metadata, &metadata);
            sqlx::query_as::<_, Producer>(
                "update producers set metadata = $2, updated_at = now() where normalized_name = $1 returning *",
            )
            .bind(&normalized_name)
            .bind(merged)
            .fetch_one(&mut **tx)
            .await
            .map_err(DbError::classify)
        })
    })
    .await
}

/// Per-field "highest confidence wins": a source's claim for a field only
/// overrides the existing value if its `confidence` is strictly higher.
fn merge_producer_metadata(existing: &serde_json::Value, incoming: &serde_json::Value) -> serde_json::Value {
    let mut merged = existing.clone();
    let (Some(existing_map), Some(incoming_map)) = (merged.as_object_mut(), incoming.as_object()) else {
        return incoming.clone();
    };

    for (field, incoming_value) in incoming_map {
        let incoming_confidence = incoming_value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let existing_confidence = existing_map
            .get(field)
            .and_then(|v| v.get("confidence"))
            .and_then(|v| v.as_f64())
            .unwrap_or(-1.0);

        if incoming_confidence > existing_confidence {
            existing_map.insert(field.clone(), incoming_value.clone());
        }
    }

    merged
}

pub async fn attribute_track_producer(
    pool: &PgPool,
    track_id: Uuid,
    producer_id: Uuid,
    source: &str,
    confidence: f32,
) -> Result<(), DbError> {
    sqlx::query(
        "insert into track_producers (track_id, producer_id, source, confidence) values ($1, $2, $3, $4)
         on conflict (track_id, producer_id, source) do update set confidence = greatest(track_producers.confidence, excluded.confidence)",
    )
    .bind(track_id)
    .bind(producer_id)
    .bind(source)
    .bind(confidence)
    .execute(pool)
    .await
    .map_err(DbError::classify)?;
    Ok(())
}

/// Stage E's graceful-degradation write: merge social fields (or the
/// `enrichmentFailed` marker) into `producers.metadata` without disturbing
/// fields Stage D already wrote.
pub async fn merge_social_metadata(pool: &PgPool, producer_id: Uuid, metadata: serde_json::Value) -> Result<(), DbError> {
    sqlx::query("update producers set metadata = metadata || $2, updated_at = now() where id = $1")
        .bind(producer_id)
        .bind(metadata)
        .execute(pool)
        .await
        .map_err(DbError::classify)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_higher_confidence_field() {
        let existing = json!({"role": {"value": "producer", "confidence": 0.6}});
        let incoming = json!({"role": {"value": "mixer", "confidence": 0.9}});
        let merged = merge_producer_metadata(&existing, &incoming);
        assert_eq!(merged["role"]["value"], "mixer");
    }

    #[test]
    fn merge_keeps_existing_when_incoming_confidence_lower() {
        let existing = json!({"role": {"value": "producer", "confidence": 0.9}});
        let incoming = json!({"role": {"value": "mixer", "confidence": 0.5}});
        let merged = merge_producer_metadata(&existing, &incoming);
        assert_eq!(merged["role"]["value"], "producer");
    }
}
