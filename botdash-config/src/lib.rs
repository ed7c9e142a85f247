//! Layered configuration loading utilities.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use botdash_core::{DEFAULT_DEX_VENUE, DEFAULT_MAX_LOGS_PER_BOT, DEFAULT_PINNED_PAIR};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

mod deserializer;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(
        default = "default_namespace",
        deserialize_with = "deserializer::namespace"
    )]
    pub namespace: String,
    /// Bearer credential used for REST calls, if the session already has one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(
        default = "default_pinned_pair",
        deserialize_with = "deserializer::uppercase"
    )]
    pub pinned_pair: String,
    #[serde(default = "default_dex_venue")]
    pub dex_venue: String,
    #[serde(default = "default_max_logs_per_bot")]
    pub max_logs_per_bot: usize,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_prefix: default_api_prefix(),
            namespace: default_namespace(),
            token: None,
            log_level: default_log_level(),
            log_path: None,
            metrics_addr: None,
            sync: SyncConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pinned_pair: default_pinned_pair(),
            dex_venue: default_dex_venue(),
            max_logs_per_bot: default_max_logs_per_bot(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_max_ms: default_reconnect_delay_max_ms(),
        }
    }
}

impl AppConfig {
    /// Base URL of the REST API, e.g. `http://host:6900/api/v1`.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            self.api_prefix.trim_start_matches('/')
        )
    }
}

impl SyncConfig {
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

impl TransportConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_max_ms.max(self.reconnect_delay_ms))
    }
}

fn default_server_url() -> String {
    "http://deadhorse.net:6900".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_namespace() -> String {
    "/v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pinned_pair() -> String {
    DEFAULT_PINNED_PAIR.to_string()
}

fn default_dex_venue() -> String {
    DEFAULT_DEX_VENUE.to_string()
}

fn default_max_logs_per_bot() -> usize {
    DEFAULT_MAX_LOGS_PER_BOT
}

fn default_monitor_interval_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_delay_max_ms() -> u64 {
    5_000
}

/// Loads configuration from `./config`, see [`load_config_from`].
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    load_config_from(Path::new("config"), env)
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `{dir}/default.toml` (optional, built-in defaults apply when missing)
/// 2. `{dir}/{environment}.toml` (if `environment` is Some)
/// 3. `{dir}/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `BOTDASH__`
pub fn load_config_from(dir: &Path, env: Option<&str>) -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from(dir.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::from(dir.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(dir.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("BOTDASH")
            .prefix_separator("__")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
