//! Dispatcher configuration loading.
//!
//! TOML is the sole config source.  Default path:
//! `/etc/streamcast/chat-dispatch.toml`, overridable with `CONFIG_PATH`.
//!
//! # Required fields
//! - `broker.bootstrap`
//! - `registry.url`
//!
//! Everything else has defaults.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Validated config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Where the status/health endpoints listen.
    pub bind: String,
    pub broker: BrokerConfig,
    pub registry: RegistryConfig,
    pub pool: PoolTimeouts,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bootstrap: String,
    pub chat_topic: String,
    pub group_id: String,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub url: String,
    pub prefix: String,
    pub lookup_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolTimeouts {
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
    pub idle_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    bind: Option<String>,
    broker: Option<RawBrokerConfig>,
    registry: Option<RawRegistryConfig>,
    pool: Option<RawPoolConfig>,
}

#[derive(Debug, Deserialize)]
struct RawBrokerConfig {
    bootstrap: Option<String>,
    chat_topic: Option<String>,
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    url: Option<String>,
    prefix: Option<String>,
    lookup_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPoolConfig {
    dial_timeout_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
    idle_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<DispatchConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let bind = raw.bind.unwrap_or_else(|| "0.0.0.0:7600".to_owned());

    let raw_broker = raw
        .broker
        .ok_or_else(|| ConfigError::MissingField("broker".to_owned()))?;
    let broker = BrokerConfig {
        bootstrap: raw_broker
            .bootstrap
            .ok_or_else(|| ConfigError::MissingField("broker.bootstrap".to_owned()))?,
        chat_topic: raw_broker
            .chat_topic
            .unwrap_or_else(|| "chat-messages".to_owned()),
        group_id: raw_broker
            .group_id
            .unwrap_or_else(|| "chat-dispatch".to_owned()),
    };

    let raw_registry = raw
        .registry
        .ok_or_else(|| ConfigError::MissingField("registry".to_owned()))?;
    let registry = RegistryConfig {
        url: raw_registry
            .url
            .ok_or_else(|| ConfigError::MissingField("registry.url".to_owned()))?,
        prefix: raw_registry.prefix.unwrap_or_else(|| "wsreg".to_owned()),
        lookup_timeout: Duration::from_millis(raw_registry.lookup_timeout_ms.unwrap_or(250)),
    };

    let pool = match raw.pool {
        Some(p) => PoolTimeouts {
            dial_timeout: Duration::from_millis(p.dial_timeout_ms.unwrap_or(2_000)),
            call_timeout: Duration::from_millis(p.call_timeout_ms.unwrap_or(1_000)),
            idle_timeout: Duration::from_secs(p.idle_timeout_secs.unwrap_or(300)),
        },
        None => PoolTimeouts {
            dial_timeout: Duration::from_millis(2_000),
            call_timeout: Duration::from_millis(1_000),
            idle_timeout: Duration::from_secs(300),
        },
    };

    Ok(DispatchConfig {
        bind,
        broker,
        registry,
        pool,
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
