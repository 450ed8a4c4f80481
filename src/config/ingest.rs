// src/config/ingest.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::http::RetryPolicy;
use crate::ingest::rate_limit::RateLimitPolicy;

pub const ENV_CONFIG_PATH: &str = "DEAL_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

pub const ENV_FLIGHT_API_KEY: &str = "FLIGHT_PROVIDER_API_KEY";
pub const ENV_HOTEL_CLIENT_ID: &str = "HOTEL_PROVIDER_CLIENT_ID";
pub const ENV_HOTEL_CLIENT_SECRET: &str = "HOTEL_PROVIDER_CLIENT_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database_path: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub http: HttpConfig,
    pub flight: FlightConfig,
    pub hotel: HotelConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/deals.sqlite"),
            rate_limit: RateLimitConfig::default(),
            http: HttpConfig::default(),
            flight: FlightConfig::default(),
            hotel: HotelConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub cooldown_secs: i64,
    pub state_ttl_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30 * 60,
            state_ttl_secs: 60 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            cooldown: chrono::Duration::seconds(self.cooldown_secs.max(0)),
            state_ttl: chrono::Duration::seconds(self.state_ttl_secs.max(0)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_attempts: u8,
    pub backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// Static-key flight search API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_host: String,
    /// "ENV" means: read from FLIGHT_PROVIDER_API_KEY
    pub api_key: String,
    pub market: String,
    pub locale: String,
    pub currency: String,
    pub adults: u32,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://skyscanner50.p.rapidapi.com".to_string(),
            api_host: "skyscanner50.p.rapidapi.com".to_string(),
            api_key: "ENV".to_string(),
            market: "US".to_string(),
            locale: "en-US".to_string(),
            currency: "USD".to_string(),
            adults: 1,
        }
    }
}

/// OAuth2 client-credentials hotel offers API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotelConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token_url: String,
    /// "ENV" means: read from HOTEL_PROVIDER_CLIENT_ID
    pub client_id: String,
    /// "ENV" means: read from HOTEL_PROVIDER_CLIENT_SECRET
    pub client_secret: String,
    pub hotel_ids: Vec<String>,
    pub adults: u32,
    pub room_quantity: u32,
}

impl Default for HotelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://test.api.amadeus.com".to_string(),
            token_url: "https://test.api.amadeus.com/v1/security/oauth2/token".to_string(),
            client_id: "ENV".to_string(),
            client_secret: "ENV".to_string(),
            hotel_ids: vec!["MCLONGHM".to_string()],
            adults: 1,
            room_quantity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 0 disables the periodic trigger.
    pub interval_secs: u64,
    pub source: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            source: "all".to_string(),
        }
    }
}

/// Load config from an explicit TOML file and resolve "ENV" secrets.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let mut cfg: IngestConfig = toml::from_str(&content)
        .with_context(|| format!("parsing ingest config {}", path.display()))?;
    cfg.resolve_env_secrets();
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $DEAL_INGEST_CONFIG
/// 2) config/ingest.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_p.exists() {
        return load_config_from(&default_p);
    }
    let mut cfg = IngestConfig::default();
    cfg.resolve_env_secrets();
    Ok(cfg)
}

impl IngestConfig {
    /// Replace "ENV" placeholders with environment values. Missing variables
    /// resolve to an empty secret; the affected provider then fails its own
    /// fetch instead of preventing startup.
    pub fn resolve_env_secrets(&mut self) {
        resolve(&mut self.flight.api_key, ENV_FLIGHT_API_KEY);
        resolve(&mut self.hotel.client_id, ENV_HOTEL_CLIENT_ID);
        resolve(&mut self.hotel.client_secret, ENV_HOTEL_CLIENT_SECRET);
    }
}

fn resolve(slot: &mut String, var: &str) {
    if slot.trim().eq_ignore_ascii_case("env") {
        *slot = env::var(var).unwrap_or_default();
        if slot.is_empty() {
            tracing::warn!(var, "secret not set in environment");
        }
    }
}
