//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `labstock.toml` in the working directory, then `LABSTOCK_*` environment
//! variables (`LABSTOCK_DATABASE_URL`, `LABSTOCK_UNIT_TIMEOUT_MS`, ...).

use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::Deserialize;
use tracing::warn;

use labstock_infra::EngineConfig;
use labstock_observability::LogConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_UNIT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_HISTORY_PAGE_SIZE: usize = 100;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_LOW_STOCK_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Postgres URL. Without one the service runs on the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    /// HS256 secret for bearer tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub log_json: bool,

    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds between low-stock sweeps; `0` disables the watcher.
    #[serde(default = "default_low_stock_interval_secs")]
    pub low_stock_interval_secs: u64,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_unit_timeout_ms() -> u64 {
    DEFAULT_UNIT_TIMEOUT_MS
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_history_page_size() -> usize {
    DEFAULT_HISTORY_PAGE_SIZE
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_low_stock_interval_secs() -> u64 {
    DEFAULT_LOW_STOCK_INTERVAL_SECS
}

impl AppConfig {
    /// Load from `labstock.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("labstock").required(false))
                .add_source(Environment::with_prefix("LABSTOCK").try_parsing(true)),
        )
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_unit_timeout(Duration::from_millis(self.unit_timeout_ms))
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_history_page_size(self.history_page_size)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    pub fn low_stock_interval(&self) -> Option<Duration> {
        match self.low_stock_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// The configured secret, or an insecure development default.
    pub fn jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => {
                warn!("LABSTOCK_JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        }
    }
}
