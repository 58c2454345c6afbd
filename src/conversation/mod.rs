//! Conversation types shared by the store, the gateway and UI consumers

mod identity;
mod normalizer;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use identity::{classify, RefKind};
pub use normalizer::{normalize, resolve_id};

/// Fallback title for conversations with nothing better to show
pub const UNTITLED: &str = "Untitled";

/// Maximum length (in characters) of a title derived from a prompt
pub const TITLE_MAX_CHARS: usize = 60;

/// One user prompt and the bot reply to it.
///
/// Either side may be empty while a reply is still pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTurn {
    #[serde(default)]
    pub user_prompt: String,

    #[serde(default)]
    pub bot_response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl MessageTurn {
    pub fn new(user_prompt: impl Into<String>, bot_response: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            bot_response: bot_response.into(),
            timestamp: None,
        }
    }
}

/// Canonical conversation record held in the cache and handed to UI consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Server-assigned id; absent until the first successful save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub title: String,

    /// Turns in chronological order
    #[serde(default)]
    pub messages: Vec<MessageTurn>,

    /// Server-reported total; may exceed `messages.len()` for previews
    #[serde(default)]
    pub message_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,

    /// Server payload this record was normalized from
    #[serde(default)]
    pub raw: Value,
}

impl ConversationRecord {
    /// A record that exists only locally
    #[cfg(test)]
    pub fn draft(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            messages: Vec::new(),
            message_count: 0,
            created_at: None,
            updated_at: None,
            raw: Value::Object(serde_json::Map::new()),
        }
    }

    /// Fewer turns are loaded than the server reports
    pub fn is_partial(&self) -> bool {
        self.messages.len() < self.message_count
    }

    /// Whether a user-supplied reference names this record, by id or by title
    pub fn matches_ref(&self, reference: &str) -> bool {
        self.title == reference || self.id.as_deref() == Some(reference)
    }

    /// Copy of this record under a new title
    pub fn with_title(&self, title: &str) -> Self {
        let mut renamed = self.clone();
        renamed.title = title.to_string();
        if let Value::Object(fields) = &mut renamed.raw {
            fields.insert("title".to_string(), Value::String(title.to_string()));
        }
        renamed
    }
}

/// Derive a conversation title from the first prompt of a chat.
///
/// Takes the first sentence of the first line, capped at [`TITLE_MAX_CHARS`].
pub fn derive_title(prompt: &str) -> String {
    let first_line = prompt
        .split('\n')
        .next()
        .unwrap_or_default()
        .trim_end_matches('\r');

    let sentence = first_sentence(first_line);
    let candidate = if sentence.is_empty() {
        first_line
    } else {
        sentence
    };

    let title: String = candidate.trim().chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

/// Text before the first `.`, `?` or `!` that is followed by whitespace
fn first_sentence(line: &str) -> &str {
    let mut chars = line.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return &line[..idx];
                }
            }
        }
    }
    line
}
