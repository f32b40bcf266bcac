//! Configuration layer: typed settings with layered precedence (file → env).

use std::{collections::HashMap, num::NonZeroU32, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, RateLimitPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "taccuino";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_LOGIN_LIMIT: i64 = 10;
const DEFAULT_LOGIN_WINDOW_SECS: i64 = 60;
const DEFAULT_LIKE_LIMIT: i64 = 30;
const DEFAULT_LIKE_WINDOW_SECS: i64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheConfig,
    /// Per-action admission policies, keyed by action name.
    pub rate_limits: HashMap<String, RateLimitPolicy>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load() -> Result<Settings, LoadError> {
    let builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(Environment::with_prefix("TACCUINO").separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: CacheConfig,
    rate_limits: HashMap<String, RateLimitPolicy>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            rate_limits,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = validate_cache_config(cache)?;
        let rate_limits = with_default_policies(rate_limits);

        Ok(Self {
            logging,
            database,
            cache,
            rate_limits,
        })
    }

    /// Policy for an action; actions without one are unlimited.
    pub fn rate_limit(&self, action: &str) -> Option<RateLimitPolicy> {
        self.rate_limits.get(action).copied()
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections)
        .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than zero"))?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn validate_cache_config(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.op_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.op_timeout_ms",
            "must be greater than zero",
        ));
    }
    if cache.sync_interval_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sync_interval_secs",
            "must be greater than zero",
        ));
    }
    if cache.entity_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.entity_ttl_secs",
            "must be greater than zero",
        ));
    }
    Ok(cache)
}

/// A deployment gets sane limits for the sensitive actions even with an
/// empty config file. Non-positive values in the file turn an action off,
/// so they pass through untouched.
fn with_default_policies(
    mut policies: HashMap<String, RateLimitPolicy>,
) -> HashMap<String, RateLimitPolicy> {
    policies.entry("login".to_string()).or_insert(RateLimitPolicy {
        limit: DEFAULT_LOGIN_LIMIT,
        window_secs: DEFAULT_LOGIN_WINDOW_SECS,
    });
    policies.entry("like".to_string()).or_insert(RateLimitPolicy {
        limit: DEFAULT_LIKE_LIMIT,
        window_secs: DEFAULT_LIKE_WINDOW_SECS,
    });
    policies
}
