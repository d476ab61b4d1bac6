//! External API client contracts (spec §4.8: "token acquisition → cache
//! (optional) → circuit breaker → rate limiter → retry → fetch"). The chain
//! itself is [`call_guarded`]; [`HttpSpotifyClient`]/[`HttpGeniusClient`] wrap
//! it with the wire format each API actually speaks.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use pipeline_core::{
    Cache, CacheNamespace, CircuitBreakerPolicy, CircuitBreakerRegistry,
    CircuitBreakerRegistryOptions, RateLimiter, ResilienceError, RetryPolicy,
};

use crate::error::StageError;
use crate::models::{ExternalAlbum, ExternalTrack, Page, ProducerCredit, SocialProfile};

/// Run `fetch` under `breaker` wrapping `rate_limiter` wrapping `retry`, in
/// that call order (spec §9: "circuit breaker → rate limiter → retry →
/// fetch"). The breaker sits outside the whole retry loop so one flaky
/// message registers at most one breaker failure, not one per retry attempt.
pub(crate) async fn call_guarded<T, F, Fut>(
    breaker: &CircuitBreakerPolicy,
    rate_limiter: &RateLimiter,
    retry: &RetryPolicy<StageError>,
    resource_key: &str,
    max_requests: u32,
    window_ms: u64,
    fetch: F,
) -> Result<T, StageError>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, StageError>> + Send,
    T: Send,
{
    let result = breaker
        .execute(|| async {
            retry
                .execute(|| async {
                    let decision = rate_limiter.can_proceed(resource_key, max_requests, window_ms, 0).await;
                    if !decision.allowed {
                        tracing::warn!(resource = resource_key, "rate limit exceeded");
                        return Err(ResilienceError::Inner(StageError::RateLimit { retry_after: None }));
                    }
                    fetch().await.map_err(ResilienceError::Inner)
                })
                .await
        })
        .await;

    result.map_err(unwrap_resilience_error)
}

fn unwrap_resilience_error(err: ResilienceError<StageError>) -> StageError {
    match err {
        ResilienceError::Timeout { .. } => StageError::Timeout,
        ResilienceError::CircuitOpen { .. } => StageError::Transient { reason: "circuit open".into() },
        ResilienceError::Bulkhead { .. } => StageError::Transient { reason: "bulkhead rejected".into() },
        ResilienceError::RetryExhausted { mut failures, .. } => {
            failures.pop().unwrap_or(StageError::Unknown { reason: "retry exhausted".into() })
        }
        ResilienceError::Inner(e) => e,
    }
}

#[async_trait]
pub trait SpotifyClient: Send + Sync {
    async fn resolve_artist_by_name(&self, name: &str) -> Result<String, StageError>;
    async fn artist_name(&self, artist_spotify_id: &str) -> Result<String, StageError>;
    async fn list_albums(&self, artist_spotify_id: &str, offset: u32) -> Result<Page<ExternalAlbum>, StageError>;
    async fn list_tracks(&self, album_spotify_id: &str, offset: u32) -> Result<Page<ExternalTrack>, StageError>;
}

#[async_trait]
pub trait GeniusClient: Send + Sync {
    async fn find_producers(&self, track_name: &str, artist_name: &str) -> Result<Vec<ProducerCredit>, StageError>;
    async fn social_profile(&self, producer_name: &str) -> Result<Option<SocialProfile>, StageError>;
}

const ALBUM_PAGE_SIZE: u32 = 50;
const TRACK_PAGE_SIZE: u32 = 50;
const SPOTIFY_MAX_REQUESTS: u32 = 90;
const SPOTIFY_WINDOW_MS: u64 = 30_000;

pub struct HttpSpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<(String, Instant)>>,
    cache: Arc<Cache<Value>>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy<StageError>,
}

impl HttpSpotifyClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        cache: Arc<Cache<Value>>,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            token: Mutex::new(None),
            cache,
            rate_limiter,
            breakers,
            retry: default_retry(),
        }
    }

    /// Client-credentials token, cached in-process until just before expiry.
    async fn access_token(&self) -> Result<String, StageError> {
        {
            let guard = self.token.lock().await;
            if let Some((token, expires_at)) = guard.as_ref() {
                if *expires_at > Instant::now() {
                    return Ok(token.clone());
                }
            }
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let resp: TokenResponse = self
            .http
            .post("https://accounts.spotify.com/api/token")
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let expires_at = Instant::now() + Duration::from_secs(resp.expires_in.saturating_sub(60));
        *self.token.lock().await = Some((resp.access_token.clone(), expires_at));
        Ok(resp.access_token)
    }

    async fn breaker(&self) -> CircuitBreakerPolicy {
        self.breakers.get_or_create("spotify-api", CircuitBreakerRegistryOptions::default()).await
    }

    async fn cached_get<T: DeserializeOwned + serde::Serialize + Clone + Send + Sync + 'static>(
        &self,
        namespace: CacheNamespace,
        cache_key: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, StageError> {
        let breaker = self.breaker().await;
        let http = self.http.clone();
        let url = url.to_string();
        let query: Vec<(String, String)> = query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();

        let value = self
            .cache
            .get_or_fetch(namespace, cache_key, || async {
                let token = self.access_token().await?;
                call_guarded(
                    &breaker,
                    &self.rate_limiter,
                    &self.retry,
                    "spotify-api",
                    SPOTIFY_MAX_REQUESTS,
                    SPOTIFY_WINDOW_MS,
                    || async {
                        let resp = http
                            .get(&url)
                            .bearer_auth(&token)
                            .query(&query)
                            .send()
                            .await?;
                        let resp = classify_http_status(resp).await?;
                        let value: Value = resp.json().await?;
                        Ok(value)
                    },
                )
                .await
            })
            .await?;

        serde_json::from_value(value)
            .map_err(|e| StageError::Unknown { reason: format!("unexpected spotify response shape: {e}") })
    }
}

#[async_trait]
impl SpotifyClient for HttpSpotifyClient {
    async fn resolve_artist_by_name(&self, name: &str) -> Result<String, StageError> {
        #[derive(serde::Deserialize, serde::Serialize, Clone)]
        struct SearchResult {
            artist_spotify_id: String,
        }

        let result: SearchResult = self
            .cached_get(
                CacheNamespace("search"),
                name,
                "https://api.spotify.com/v1/search",
                &[("q", name.to_string()), ("type", "artist".to_string()), ("limit", "1".to_string())],
            )
            .await?;
        Ok(result.artist_spotify_id)
    }

    async fn artist_name(&self, artist_spotify_id: &str) -> Result<String, StageError> {
        #[derive(serde::Deserialize, serde::Serialize, Clone)]
        struct ArtistResponse {
            name: String,
        }

        let result: ArtistResponse = self
            .cached_get(
                CacheNamespace("artist"),
                artist_spotify_id,
                &format!("https://api.spotify.com/v1/artists/{artist_spotify_id}"),
                &[],
            )
            .await?;
        Ok(result.name)
    }

    async fn list_albums(&self, artist_spotify_id: &str, offset: u32) -> Result<Page<ExternalAlbum>, StageError> {
        let cache_key = format!("{artist_spotify_id}:{offset}");
        self.cached_get(
            CacheNamespace("albums"),
            &cache_key,
            &format!("https://api.spotify.com/v1/artists/{artist_spotify_id}/albums"),
            &[("limit", ALBUM_PAGE_SIZE.to_string()), ("offset", offset.to_string())],
        )
        .await
    }

    async fn list_tracks(&self, album_spotify_id: &str, offset: u32) -> Result<Page<ExternalTrack>, StageError> {
        let cache_key = format!("{album_spotify_id}:{offset}");
        self.cached_get(
            CacheNamespace("tracks"),
            &cache_key,
            &format!("https://api.spotify.com/v1/albums/{album_spotify_id}/tracks"),
            &[("limit", TRACK_PAGE_SIZE.to_string()), ("offset", offset.to_string())],
        )
        .await
    }
}

const GENIUS_MAX_REQUESTS: u32 = 60;
const GENIUS_WINDOW_MS: u64 = 60_000;

pub struct HttpGeniusClient {
    http: reqwest::Client,
    access_token: Option<String>,
    cache: Arc<Cache<Value>>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy<StageError>,
}

impl HttpGeniusClient {
    pub fn new(
        access_token: Option<String>,
        cache: Arc<Cache<Value>>,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self { http: reqwest::Client::new(), access_token, cache, rate_limiter, breakers, retry: default_retry() }
    }

    async fn breaker(&self) -> CircuitBreakerPolicy {
        self.breakers.get_or_create("genius-api", CircuitBreakerRegistryOptions::default()).await
    }
}

#[async_trait]
impl GeniusClient for HttpGeniusClient {
    /// Genius integration is entirely optional (§6.4): with no access token
    /// configured, every lookup degrades to an empty/`None` result rather
    /// than an error, so stage D/E still succeed without producer credits.
    async fn find_producers(&self, track_name: &str, artist_name: &str) -> Result<Vec<ProducerCredit>, StageError> {
        let Some(token) = &self.access_token else {
            return Ok(Vec::new());
        };

        let breaker = self.breaker().await;
        let http = self.http.clone();
        let cache_key = format!("{artist_name}:{track_name}");

        let value = self
            .cache
            .get_or_fetch(CacheNamespace("genius-credits"), &cache_key, || async {
                call_guarded(
                    &breaker,
                    &self.rate_limiter,
                    &self.retry,
                    "genius-api",
                    GENIUS_MAX_REQUESTS,
                    GENIUS_WINDOW_MS,
                    || async {
                        let resp = http
                            .get("https://api.genius.com/search")
                            .bearer_auth(token)
                            .query(&[("q", format!("{artist_name} {track_name}"))])
                            .send()
                            .await?;
                        let resp = classify_http_status(resp).await?;
                        let value: Value = resp.json().await?;
                        Ok(value)
                    },
                )
                .await
            })
            .await?;

        let credits: Vec<ProducerCredit> = serde_json::from_value(value).unwrap_or_default();
        Ok(credits)
    }

    async fn social_profile(&self, producer_name: &str) -> Result<Option<SocialProfile>, StageError> {
        let Some(token) = &self.access_token else {
            return Ok(None);
        };

        let breaker = self.breaker().await;
        let http = self.http.clone();

        let result = call_guarded(
            &breaker,
            &self.rate_limiter,
            &self.retry,
            "genius-api",
            GENIUS_MAX_REQUESTS,
            GENIUS_WINDOW_MS,
            || async {
                let resp = http
                    .get("https://api.genius.com/search")
                    .bearer_auth(token)
                    .query(&[("q", producer_name.to_string())])
                    .send()
                    .await?;
                let resp = classify_http_status(resp).await?;
                let profile: Option<SocialProfile> = resp.json().await?;
                Ok(profile)
            },
        )
        .await;

        // Graceful degradation (spec §4.8 stage E): an unresolved profile is
        // not a failure, it's a `None`.
        match result {
            Ok(profile) => Ok(profile),
            Err(StageError::NotFound { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

async fn classify_http_status(resp: reqwest::Response) -> Result<reqwest::Response, StageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| pipeline_core::parse_retry_after(v, std::time::SystemTime::now()));
        return Err(StageError::RateLimit { retry_after });
    }

    match status.as_u16() {
        401 | 403 => Err(StageError::Authorization { reason: format!("http {status}") }),
        404 => Err(StageError::NotFound { reason: format!("http {status}") }),
        408 | 425 => Err(StageError::Transient { reason: format!("http {status}") }),
        s if (400..500).contains(&s) => Err(StageError::Validation { reason: format!("http {status}") }),
        _ => Err(StageError::Transient { reason: format!("http {status}") }),
    }
}

fn default_retry() -> RetryPolicy<StageError> {
    RetryPolicy::builder()
        .max_attempts(4)
        .expect("4 > 0")
        .should_retry(|e: &StageError| {
            !matches!(
                e,
                StageError::Validation { .. }
                    | StageError::Authorization { .. }
                    | StageError::NotFound { .. }
                    | StageError::MissingRecord { .. }
            )
        })
        .with_delay_override(|e: &StageError| match e {
            StageError::RateLimit { retry_after } => *retry_after,
            _ => None,
        })
        .build()
}
