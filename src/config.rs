// src/config.rs

use std::{collections::HashMap, env, path::PathBuf, time::Duration};
use thiserror::Error;

pub const DEFAULT_RANGE: &str = "A3:L";
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(300);
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Startup settings, read once from the environment.
#[derive(Clone)]
pub struct Config {
    pub spreadsheet_id: String,
    /// Raw service-account JSON.
    pub google_client_secret: String,
    pub range: String,
    pub period: Duration,
    pub store_url: Option<String>,
    pub history_dir: PathBuf,
    pub port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("google_client_secret", &"<redacted>")
            .field("range", &self.range)
            .field("period", &self.period)
            .field("store_url", &self.store_url)
            .field("history_dir", &self.history_dir)
            .field("port", &self.port)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let period = match get("KYC_IMPORT_PERIOD_SECS") {
            None => DEFAULT_PERIOD,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: "KYC_IMPORT_PERIOD_SECS",
                        value: raw,
                        reason: "period must be positive",
                    })
                }
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    return Err(ConfigError::Invalid {
                        key: "KYC_IMPORT_PERIOD_SECS",
                        value: raw,
                        reason: "expected whole seconds",
                    })
                }
            },
        };

        let port = match get("PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw.clone(),
                reason: "expected a TCP port",
            })?,
        };

        Ok(Config {
            spreadsheet_id: require("KYC_SPREADSHEET_ID")?,
            google_client_secret: require("KYC_GOOGLE_CLIENT_SECRET")?,
            range: get("KYC_SHEET_RANGE").unwrap_or_else(|| DEFAULT_RANGE.to_string()),
            period,
            store_url: get("KYC_STORE_URL"),
            history_dir: get("KYC_HISTORY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("history")),
            port,
        })
    }
}
