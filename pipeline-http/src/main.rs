//! Pipeline HTTP binary (spec §6.1): one tick/health/admin endpoint per
//! stage, backed by the same `WorkerBase` runtime a standalone poller would
//! use, plus the periodic stalled-message maintenance loop of spec §4.7.

mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pipeline_core::config::{Config, StageId};
use pipeline_core::{Cache, CircuitBreakerRegistry, RateLimiter};
use pipeline_db::{PgCircuitBreakerStore, PgQueueStore, PgRateLimitStore, QueueStore};
use pipeline_stages::client::{GeniusClient, HttpGeniusClient, HttpSpotifyClient, SpotifyClient};
use pipeline_stages::handlers::{AlbumHandler, ArtistHandler, ProducerHandler, SocialHandler, TrackHandler};
use pipeline_stages::queues::{ALBUM_QUEUE, ARTIST_QUEUE, PRODUCER_QUEUE, SOCIAL_QUEUE, TRACK_QUEUE};
use pipeline_worker::{MetricsRecorder, WorkerConfig};

use crate::state::AppState;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if config.is_development() { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = PgPoolOptions::new().max_connections(20).connect(&config.db_url).await?;
    sqlx::migrate!("../pipeline-db/migrations").run(&pool).await?;

    let queue_store: Arc<dyn QueueStore> = Arc::new(PgQueueStore::new(pool.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::with_store(Arc::new(PgCircuitBreakerStore::new(pool.clone()))));
    let rate_limiter = Arc::new(RateLimiter::new(Arc::new(PgRateLimitStore::new(pool.clone()))));
    let api_cache = Arc::new(Cache::new(Default::default()));

    let spotify: Arc<dyn SpotifyClient> = Arc::new(HttpSpotifyClient::new(
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
        api_cache.clone(),
        rate_limiter.clone(),
        breakers.clone(),
    ));
    let genius: Arc<dyn GeniusClient> = Arc::new(HttpGeniusClient::new(
        config.genius_access_token.clone(),
        api_cache.clone(),
        rate_limiter.clone(),
        breakers.clone(),
    ));

    let config = Arc::new(config);
    let recorder: Arc<dyn MetricsRecorder> = Arc::new(pool.clone());

    let artist = pipeline_worker::WorkerBase::new(
        worker_config(&config, ARTIST_QUEUE, StageId::Artist),
        queue_store.clone(),
        recorder.clone(),
        breakers.clone(),
        ArtistHandler::new(spotify.clone(), pool.clone()),
    );
    let album = pipeline_worker::WorkerBase::new(
        worker_config(&config, ALBUM_QUEUE, StageId::Album),
        queue_store.clone(),
        recorder.clone(),
        breakers.clone(),
        AlbumHandler::new(spotify.clone(), pool.clone()),
    );
    let track = pipeline_worker::WorkerBase::new(
        worker_config(&config, TRACK_QUEUE, StageId::Track),
        queue_store.clone(),
        recorder.clone(),
        breakers.clone(),
        TrackHandler::new(spotify.clone(), pool.clone()),
    );
    let producer = pipeline_worker::WorkerBase::new(
        worker_config(&config, PRODUCER_QUEUE, StageId::Producer),
        queue_store.clone(),
        recorder.clone(),
        breakers.clone(),
        ProducerHandler::new(spotify.clone(), genius.clone(), pool.clone()),
    );
    let social = pipeline_worker::WorkerBase::new(
        worker_config(&config, SOCIAL_QUEUE, StageId::Social),
        queue_store.clone(),
        recorder.clone(),
        breakers.clone(),
        SocialHandler::new(genius.clone(), pool.clone()),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        queue_store: queue_store.clone(),
        http_semaphore: Arc::new(Semaphore::new(config.max_concurrent_http)),
        artist,
        album,
        track,
        producer,
        social,
    });

    spawn_maintenance_loop(pool.clone(), queue_store);

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.http_bind_addr.as_str()).await?;
    tracing::info!(addr = %config.http_bind_addr, "pipeline-http listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn worker_config(config: &Config, queue_name: &str, stage: StageId) -> WorkerConfig {
    WorkerConfig {
        queue_name: queue_name.to_string(),
        service_name: "pipeline-http".to_string(),
        visibility_timeout_secs: config.visibility_timeout_secs as i64,
        batch_size: config.batch_size as i64,
        max_retries: config.max_retries as i32,
        per_message_timeout: config.timeout_for_stage(stage),
        worker_instance: format!("pipeline-http-{queue_name}"),
    }
}

fn spawn_maintenance_loop(pool: sqlx::PgPool, queue_store: Arc<dyn QueueStore>) {
    tokio::spawn(async move {
        let queues = [ARTIST_QUEUE, ALBUM_QUEUE, TRACK_QUEUE, PRODUCER_QUEUE, SOCIAL_QUEUE];
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = pipeline_worker::run_maintenance(
                &pool,
                &queue_store,
                &queues,
                pipeline_worker::DEFAULT_STALLED_AFTER_SECS,
            )
            .await
            {
                tracing::error!(error = %e, "maintenance pass failed");
            }
        }
    });
}
