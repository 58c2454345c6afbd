//! Remote API endpoint configuration loaded from TOML
//!
//! ```toml
//! [endpoints]
//! conversations_url = "https://api.example.com/conversations"
//! save_url = "https://api.example.com/save"
//! timeout_secs = 30
//! fetch_strategies = ["query_id", "path_suffix", "messages_path"]
//! ```

use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::gateway::{default_fetch_strategies, FetchStrategy};

use super::ConfigError;

/// Root of an endpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsFile {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

/// Where the conversation API lives and how to address single conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// List/query endpoint; also the base for single-conversation fetches
    #[serde(default = "default_conversations_url")]
    pub conversations_url: String,

    /// Save endpoint (POST append, PUT rename, DELETE remove)
    #[serde(default = "default_save_url")]
    pub save_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Candidate URL shapes for a single conversation, tried in order
    #[serde(default = "default_fetch_strategies")]
    pub fetch_strategies: Vec<FetchStrategy>,
}

fn default_conversations_url() -> String {
    "http://localhost:8080/conversations".to_string()
}

fn default_save_url() -> String {
    "http://localhost:8080/save".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            conversations_url: default_conversations_url(),
            save_url: default_save_url(),
            timeout_secs: default_timeout_secs(),
            fetch_strategies: default_fetch_strategies(),
        }
    }
}

impl EndpointsConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let file: EndpointsFile = toml::from_str(content)?;
        Ok(file.endpoints)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("conversations_url", &self.conversations_url),
            ("save_url", &self.save_url),
        ] {
            Url::parse(url)
                .map_err(|e| ConfigError::Validation(format!("{} '{}': {}", name, url, e)))?;
        }

        if self.fetch_strategies.is_empty() {
            return Err(ConfigError::Validation(
                "fetch_strategies must name at least one strategy".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
