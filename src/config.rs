//! Layered configuration: built-in defaults, then `config.toml`, then the
//! environment (`DB_URL`, `DB_USER`, `DB_PASS`, ...).

use crate::db::url::redact;
use crate::error::BootstrapError;
use crate::service::bootstrapper::{ConnectionConfig, RetryPolicy};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";

/// Settings read from the environment verbatim: a password such as `007`
/// must reach the driver unchanged.
const STRING_KEYS: &[&str] = &[
    "db_driver",
    "db_url",
    "db_user",
    "db_pass",
    "schema_path",
    "loglevel",
];

const NUMERIC_KEYS: &[&str] = &[
    "db_max_attempts",
    "db_retry_delay_ms",
    "db_max_connections",
    "db_min_connections",
    "db_acquire_timeout_secs",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Postgres,
    Sqlite,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_driver: Driver,
    pub db_url: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_max_attempts: u32,
    pub db_retry_delay_ms: u64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_driver: Driver::Postgres,
            db_url: String::new(),
            db_user: String::new(),
            db_pass: String::new(),
            db_max_attempts: 10,
            db_retry_delay_ms: 3_000,
            db_max_connections: 10,
            db_min_connections: 0,
            db_acquire_timeout_secs: 5,
            schema_path: None,
            loglevel: "info".to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("db_driver", &self.db_driver)
            .field("db_url", &redact(&self.db_url))
            .field("db_user", &self.db_user)
            .field("db_pass", &"***")
            .field("db_max_attempts", &self.db_max_attempts)
            .field("db_retry_delay_ms", &self.db_retry_delay_ms)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("schema_path", &self.schema_path)
            .field("loglevel", &self.loglevel)
            .finish()
    }
}

impl Config {
    /// Load from defaults, `config.toml` (if present) and the environment.
    pub fn load() -> Result<Self, BootstrapError> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(NUMERIC_KEYS))
            .merge(string_env())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, BootstrapError> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the bootstrapper cannot act on.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.db_url.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "DB_URL must be set to a non-empty connection string".to_string(),
            ));
        }
        if self.db_max_attempts == 0 {
            return Err(BootstrapError::InvalidConfig(
                "DB_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.db_max_connections == 0 || self.db_min_connections > self.db_max_connections {
            return Err(BootstrapError::InvalidConfig(format!(
                "pool bounds invalid: min={} max={}",
                self.db_min_connections, self.db_max_connections
            )));
        }
        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.db_url.trim(), &self.db_user, &self.db_pass)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.db_max_attempts,
            retry_delay: Duration::from_millis(self.db_retry_delay_ms),
        }
    }
}

/// `Env` parses values as TOML-like literals, so string settings bypass it.
fn string_env() -> Serialized<BTreeMap<&'static str, String>> {
    let values = STRING_KEYS
        .iter()
        .filter_map(|key| {
            env::var(key.to_ascii_uppercase())
                .ok()
                .map(|value| (*key, value))
        })
        .collect();
    Serialized::defaults(values)
}
