//! Environment-driven configuration, shared by the worker, stage, and HTTP
//! crates. Populated with `envy`, consistent with the rest of the pack's
//! preference for deserializing config via `serde` rather than hand-rolled
//! `std::env::var` parsing.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Identifies one of the five pipeline stages for per-stage timeout overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Artist discovery/enrichment (queue A).
    Artist,
    /// Album enumeration (queue B).
    Album,
    /// Track enumeration (queue C).
    Track,
    /// Producer identification, fans out to Genius (queue D).
    Producer,
    /// Social enrichment (queue E).
    Social,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Production
    }
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_per_message_timeout_secs() -> u64 {
    30
}

fn default_http_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_concurrent_http() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_url: String,
    pub db_service_key: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub genius_access_token: Option<String>,
    #[serde(default)]
    pub environment: Environment,

    /// Queue message visibility timeout, i.e. how long a `read` hides a
    /// message from other pollers before it's considered stalled.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fallback per-message timeout when a stage has no entry in
    /// `per_stage_timeout`.
    #[serde(default = "default_per_message_timeout_secs")]
    pub per_message_timeout_secs: u64,
    #[serde(default = "default_http_bind_addr")]
    pub http_bind_addr: String,
    /// Global outbound-HTTP concurrency cap (the backpressure semaphore).
    #[serde(default = "default_max_concurrent_http")]
    pub max_concurrent_http: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Per-stage timeout table (Open Question (d)): stage C (track
    /// enumeration) gets 60s, stage D (producer identification) gets 120s,
    /// stage E (social enrichment) gets 180s, everything else falls back to
    /// `per_message_timeout_secs` (default 30s).
    pub fn per_stage_timeout(&self) -> HashMap<StageId, Duration> {
        let mut map = HashMap::new();
        map.insert(StageId::Artist, Duration::from_secs(self.per_message_timeout_secs));
        map.insert(StageId::Album, Duration::from_secs(self.per_message_timeout_secs));
        map.insert(StageId::Track, Duration::from_secs(60));
        map.insert(StageId::Producer, Duration::from_secs(120));
        map.insert(StageId::Social, Duration::from_secs(180));
        map
    }

    pub fn timeout_for_stage(&self, stage: StageId) -> Duration {
        self.per_stage_timeout()
            .get(&stage)
            .copied()
            .unwrap_or_else(|| Duration::from_secs(self.per_message_timeout_secs))
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            db_url: "postgres://localhost/pipeline".to_string(),
            db_service_key: "service-key".to_string(),
            spotify_client_id: "client".to_string(),
            spotify_client_secret: "secret".to_string(),
            genius_access_token: None,
            environment: Environment::Production,
            visibility_timeout_secs: default_visibility_timeout_secs(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            per_message_timeout_secs: default_per_message_timeout_secs(),
            http_bind_addr: default_http_bind_addr(),
            max_concurrent_http: default_max_concurrent_http(),
        }
    }

    #[test]
    fn per_stage_timeouts_match_ascending_complexity() {
        let config = base_config();
        assert_eq!(config.timeout_for_stage(StageId::Artist), Duration::from_secs(30));
        assert_eq!(config.timeout_for_stage(StageId::Track), Duration::from_secs(60));
        assert_eq!(config.timeout_for_stage(StageId::Producer), Duration::from_secs(120));
        assert_eq!(config.timeout_for_stage(StageId::Social), Duration::from_secs(180));
    }

    #[test]
    fn environment_defaults_to_production() {
        assert_eq!(Environment::default(), Environment::Production);
    }

    #[test]
    fn is_development_reflects_environment() {
        let mut config = base_config();
        assert!(!config.is_development());
        config.environment = Environment::Development;
        assert!(config.is_development());
    }
}
