//! Signaling service configuration loading.
//!
//! TOML is the sole config source.  Default path:
//! `/etc/streamcast/signaling.toml`, overridable with `CONFIG_PATH`.
//!
//! # Required fields
//! - `bind`
//! - `advertised_address` (what other services dial; written to the registry)
//! - `auth.base_url`, `rooms.base_url`, `ingest.base_url`
//! - `registry.url`
//! - `events.bootstrap`

use crate::state::{BroadcastTuning, InstanceOptions, WsTuning};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub bind: String,
    pub auth_base_url: String,
    pub rooms_base_url: String,
    pub ingest_base_url: String,
    pub registry: RegistryConfig,
    pub events: EventsConfig,
    pub options: InstanceOptions,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub url: String,
    pub prefix: String,
    pub lookup_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub bootstrap: String,
    pub topic: String,
    /// Partition count used when provisioning the topic.
    pub partitions: i32,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    bind: Option<String>,
    advertised_address: Option<String>,
    auth: Option<RawServiceRef>,
    rooms: Option<RawServiceRef>,
    ingest: Option<RawServiceRef>,
    registry: Option<RawRegistryConfig>,
    events: Option<RawEventsConfig>,
    ws: Option<RawWsConfig>,
    broadcast: Option<RawBroadcastConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServiceRef {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    url: Option<String>,
    prefix: Option<String>,
    lookup_timeout_ms: Option<u64>,
    session_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawEventsConfig {
    bootstrap: Option<String>,
    topic: Option<String>,
    partitions: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawWsConfig {
    ping_interval_ms: Option<u64>,
    pong_wait_ms: Option<u64>,
    write_wait_ms: Option<u64>,
    max_message_size: Option<usize>,
    outbound_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawBroadcastConfig {
    heartbeat_timeout_secs: Option<u64>,
    grace_period_secs: Option<u64>,
    watchdog_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<SignalingConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<SignalingConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let bind = raw
        .bind
        .ok_or_else(|| ConfigError::MissingField("bind".to_owned()))?;
    let advertised_address = raw
        .advertised_address
        .ok_or_else(|| ConfigError::MissingField("advertised_address".to_owned()))?;

    let base_url = |section: Option<RawServiceRef>, name: &str| -> Result<String, ConfigError> {
        section
            .and_then(|s| s.base_url)
            .ok_or_else(|| ConfigError::MissingField(format!("{name}.base_url")))
    };
    let auth_base_url = base_url(raw.auth, "auth")?;
    let rooms_base_url = base_url(raw.rooms, "rooms")?;
    let ingest_base_url = base_url(raw.ingest, "ingest")?;

    let raw_registry = raw
        .registry
        .ok_or_else(|| ConfigError::MissingField("registry".to_owned()))?;
    let session_ttl = Duration::from_secs(raw_registry.session_ttl_secs.unwrap_or(60));
    let registry = RegistryConfig {
        url: raw_registry
            .url
            .ok_or_else(|| ConfigError::MissingField("registry.url".to_owned()))?,
        prefix: raw_registry.prefix.unwrap_or_else(|| "wsreg".to_owned()),
        lookup_timeout: Duration::from_millis(raw_registry.lookup_timeout_ms.unwrap_or(250)),
    };

    let raw_events = raw
        .events
        .ok_or_else(|| ConfigError::MissingField("events".to_owned()))?;
    let events = EventsConfig {
        bootstrap: raw_events
            .bootstrap
            .ok_or_else(|| ConfigError::MissingField("events.bootstrap".to_owned()))?,
        topic: raw_events
            .topic
            .unwrap_or_else(|| "broadcast-events".to_owned()),
        partitions: raw_events.partitions.unwrap_or(12),
    };

    let defaults = WsTuning::default();
    let ws = match raw.ws {
        Some(w) => WsTuning {
            ping_interval: w
                .ping_interval_ms
                .map_or(defaults.ping_interval, Duration::from_millis),
            pong_wait: w
                .pong_wait_ms
                .map_or(defaults.pong_wait, Duration::from_millis),
            write_wait: w
                .write_wait_ms
                .map_or(defaults.write_wait, Duration::from_millis),
            max_message_size: w.max_message_size.unwrap_or(defaults.max_message_size),
            outbound_buffer: w.outbound_buffer.unwrap_or(defaults.outbound_buffer),
        },
        None => defaults,
    };

    let defaults = BroadcastTuning::default();
    let broadcast = match raw.broadcast {
        Some(b) => BroadcastTuning {
            heartbeat_timeout: b
                .heartbeat_timeout_secs
                .map_or(defaults.heartbeat_timeout, Duration::from_secs),
            grace_period: b
                .grace_period_secs
                .map_or(defaults.grace_period, Duration::from_secs),
            watchdog_interval: b
                .watchdog_interval_secs
                .map_or(defaults.watchdog_interval, Duration::from_secs),
        },
        None => defaults,
    };

    Ok(SignalingConfig {
        bind,
        auth_base_url,
        rooms_base_url,
        ingest_base_url,
        registry,
        events,
        options: InstanceOptions {
            advertised_address,
            session_ttl,
            ws,
            broadcast,
        },
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
