//! Remote conversation API
//!
//! Each operation is a single request with no client-side retry. Responses
//! come back as raw JSON; shaping them is the normalizer's job.

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod strategy;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::conversation::{classify, RefKind};

pub use http::HttpGateway;
pub use strategy::{default_fetch_strategies, FetchStrategy};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Body of a save request: one turn appended to (or starting) a conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub title: String,
    pub user_prompt: String,
    pub bot_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

/// Which conversation a rename or delete addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Target {
    #[serde(rename = "uniqueId")]
    UniqueId(String),
    #[serde(rename = "title")]
    Title(String),
}

impl Target {
    /// Route a user-supplied reference to the id or title parameter
    pub fn from_ref(reference: &str) -> Self {
        match classify(reference) {
            RefKind::Id => Target::UniqueId(reference.to_string()),
            RefKind::Title => Target::Title(reference.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePayload {
    #[serde(flatten)]
    pub target: Target,
    pub new_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletePayload {
    #[serde(flatten)]
    pub target: Target,
}

/// Request/response access to the conversation API
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// List conversations, optionally filtered by title
    async fn list_conversations(&self, title_filter: &str) -> Result<Value, GatewayError>;

    /// Fetch one conversation with all of its messages.
    ///
    /// `Ok(None)` when every candidate endpoint answered without a usable payload.
    async fn get_conversation(&self, id: &str) -> Result<Option<Value>, GatewayError>;

    /// Append a turn, creating the conversation when no id is attached
    async fn upsert_turn(&self, payload: &SavePayload) -> Result<Value, GatewayError>;

    async fn rename(&self, payload: &RenamePayload) -> Result<Value, GatewayError>;

    async fn delete(&self, payload: &DeletePayload) -> Result<Value, GatewayError>;
}
