//! Social service configuration loading.
//!
//! TOML is the sole config source.  Default path:
//! `/etc/streamcast/social.toml`, overridable with `CONFIG_PATH`.
//!
//! # Required fields
//! - `bind`
//! - `database.url`
//! - `cache.url`
//! - `broker.bootstrap`
//! - `auth.base_url`

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SocialConfig {
    pub bind: String,
    pub database_url: String,
    pub auth_base_url: String,
    pub cache: CacheConfig,
    pub broker: BrokerConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bootstrap: String,
    pub cdc_topic: String,
    pub group_id: String,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub top_n: usize,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    bind: Option<String>,
    database: Option<RawDatabaseConfig>,
    cache: Option<RawCacheConfig>,
    broker: Option<RawBrokerConfig>,
    auth: Option<RawAuthConfig>,
    reconciler: Option<RawReconcilerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawDatabaseConfig {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCacheConfig {
    url: Option<String>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawBrokerConfig {
    bootstrap: Option<String>,
    cdc_topic: Option<String>,
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthConfig {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReconcilerConfig {
    interval_secs: Option<u64>,
    top_n: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<SocialConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<SocialConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let bind = raw
        .bind
        .ok_or_else(|| ConfigError::MissingField("bind".to_owned()))?;
    let database_url = raw
        .database
        .and_then(|d| d.url)
        .ok_or_else(|| ConfigError::MissingField("database.url".to_owned()))?;
    let auth_base_url = raw
        .auth
        .and_then(|a| a.base_url)
        .ok_or_else(|| ConfigError::MissingField("auth.base_url".to_owned()))?;

    let raw_cache = raw
        .cache
        .ok_or_else(|| ConfigError::MissingField("cache".to_owned()))?;
    let cache = CacheConfig {
        url: raw_cache
            .url
            .ok_or_else(|| ConfigError::MissingField("cache.url".to_owned()))?,
        ttl: Duration::from_secs(raw_cache.ttl_secs.unwrap_or(300)),
    };

    let raw_broker = raw
        .broker
        .ok_or_else(|| ConfigError::MissingField("broker".to_owned()))?;
    let broker = BrokerConfig {
        bootstrap: raw_broker
            .bootstrap
            .ok_or_else(|| ConfigError::MissingField("broker.bootstrap".to_owned()))?,
        cdc_topic: raw_broker
            .cdc_topic
            .unwrap_or_else(|| "follows-cdc".to_owned()),
        group_id: raw_broker
            .group_id
            .unwrap_or_else(|| "social-cdc".to_owned()),
    };

    let reconciler = match raw.reconciler {
        Some(r) => ReconcilerConfig {
            interval: Duration::from_secs(r.interval_secs.unwrap_or(60)),
            top_n: r.top_n.unwrap_or(100),
        },
        None => ReconcilerConfig {
            interval: Duration::from_secs(60),
            top_n: 100,
        },
    };

    Ok(SocialConfig {
        bind,
        database_url,
        auth_base_url,
        cache,
        broker,
        reconciler,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}
