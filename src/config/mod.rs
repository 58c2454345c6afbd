//! Application configuration

pub mod endpoints;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use endpoints::{EndpointsConfig, EndpointsFile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub endpoints: EndpointsConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup (environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut endpoints = match lookup("CHAT_STORE_ENDPOINTS") {
            Some(path) => EndpointsConfig::from_file(&PathBuf::from(path))?,
            None => EndpointsConfig::default(),
        };

        if let Some(url) = lookup("CHAT_STORE_CONV_URL") {
            endpoints.conversations_url = url;
        }
        if let Some(url) = lookup("CHAT_STORE_SAVE_URL") {
            endpoints.save_url = url;
        }
        if let Some(secs) = lookup("CHAT_STORE_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            endpoints.timeout_secs = secs;
        }
        endpoints.validate()?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir: lookup("CHAT_STORE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            endpoints,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
