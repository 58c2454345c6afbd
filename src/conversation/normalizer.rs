//! Server payload normalization
//!
//! The conversation API answers with several shapes depending on the
//! endpoint: list previews carry `lastMessage` or `lastMessages`, full fetches
//! carry `messages`, ids live under `_id`, `uniqueId` or `id`. Everything is
//! folded into one [`ConversationRecord`] here.

use serde_json::Value;

use super::{ConversationRecord, MessageTurn, UNTITLED};

const ID_FIELDS: [&str; 3] = ["_id", "uniqueId", "id"];
const TITLE_FIELDS: [&str; 2] = ["title", "name"];
const USER_FIELDS: [&str; 2] = ["userPrompt", "user"];
const BOT_FIELDS: [&str; 2] = ["botResponse", "bot"];

static NULL: Value = Value::Null;

/// Normalize any server conversation payload into a [`ConversationRecord`].
///
/// Never fails: unknown shapes produce an untitled record with no messages.
/// An array payload is treated as its first element. Normalizing the
/// serialized form of a normalized record yields the same record.
pub fn normalize(item: &Value) -> ConversationRecord {
    let item = match item {
        Value::Array(items) => items.first().unwrap_or(&NULL),
        other => other,
    };

    let messages = turns_of(item);
    let message_count = reported_count(item).unwrap_or(0).max(messages.len());

    ConversationRecord {
        id: resolve_id(item),
        title: first_text(item, &TITLE_FIELDS).unwrap_or_else(|| UNTITLED.to_string()),
        messages,
        message_count,
        created_at: present(item, "createdAt"),
        updated_at: present(item, "updatedAt"),
        // a record that was already normalized keeps its original payload
        raw: item.get("raw").cloned().unwrap_or_else(|| item.clone()),
    }
}

/// First non-empty id among `_id`, `uniqueId`, `id`
pub fn resolve_id(item: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| match item.get(*field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn turns_of(item: &Value) -> Vec<MessageTurn> {
    if let Some(Value::Array(turns)) = item.get("messages") {
        return turns.iter().map(turn_of).collect();
    }
    if let Some(Value::Array(turns)) = item.get("lastMessages") {
        return turns.iter().map(turn_of).collect();
    }
    match item.get("lastMessage") {
        Some(last @ Value::Object(_)) => vec![turn_of(last)],
        _ => Vec::new(),
    }
}

fn turn_of(turn: &Value) -> MessageTurn {
    MessageTurn {
        user_prompt: first_text(turn, &USER_FIELDS).unwrap_or_default(),
        bot_response: first_text(turn, &BOT_FIELDS).unwrap_or_default(),
        timestamp: present(turn, "timestamp"),
    }
}

fn reported_count(item: &Value) -> Option<usize> {
    match item.get("messageCount")? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_text(item: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match item.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn present(item: &Value, field: &str) -> Option<Value> {
    item.get(field).filter(|v| !v.is_null()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renormalize(record: &ConversationRecord) -> ConversationRecord {
        normalize(&serde_json::to_value(record).unwrap())
    }

    fn shapes() -> Vec<Value> {
        vec![
            json!({
                "_id": "507f1f77bcf86cd799439011",
                "title": "Full",
                "messages": [
                    { "userPrompt": "hello", "botResponse": "hi", "timestamp": "2024-01-01T00:00:00Z" },
                    { "userPrompt": "how are you", "botResponse": "fine" }
                ],
                "messageCount": 2,
                "createdAt": "2024-01-01T00:00:00Z"
            }),
            json!({
                "uniqueId": "abc-123",
                "name": "Preview",
                "lastMessages": [
                    { "user": "first", "bot": "one" },
                    { "userPrompt": "second", "botResponse": "two" }
                ],
                "messageCount": 7
            }),
            json!({
                "id": "42",
                "title": "Last",
                "lastMessage": { "user": "ping", "bot": "pong", "timestamp": 1700000000 },
                "folder": "work"
            }),
            json!({ "title": "Empty" }),
            json!("not a conversation"),
        ]
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for shape in shapes() {
            let once = normalize(&shape);
            assert_eq!(renormalize(&once), once, "shape: {shape}");
        }
    }

    #[test]
    fn test_messages_shape() {
        let record = normalize(&shapes()[0]);
        assert_eq!(record.id.as_deref(), Some("507f1f77bcf86cd799439011"));
        assert_eq!(record.title, "Full");
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].user_prompt, "hello");
        assert_eq!(record.messages[0].bot_response, "hi");
        assert!(record.messages[0].timestamp.is_some());
        assert_eq!(record.message_count, 2);
        assert!(!record.is_partial());
    }

    #[test]
    fn test_last_messages_shape() {
        let record = normalize(&shapes()[1]);
        assert_eq!(record.id.as_deref(), Some("abc-123"));
        assert_eq!(record.title, "Preview");
        assert_eq!(record.messages[0].user_prompt, "first");
        assert_eq!(record.messages[0].bot_response, "one");
        assert_eq!(record.messages[1].user_prompt, "second");
        assert_eq!(record.messages[1].bot_response, "two");
        assert_eq!(record.message_count, 7);
        assert!(record.is_partial());
    }

    #[test]
    fn test_last_message_shape() {
        let record = normalize(&shapes()[2]);
        assert_eq!(record.id.as_deref(), Some("42"));
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].user_prompt, "ping");
        assert_eq!(record.messages[0].bot_response, "pong");
        assert_eq!(record.message_count, 1);
        assert_eq!(record.raw["folder"], "work");
    }

    #[test]
    fn test_no_messages_shape() {
        let record = normalize(&shapes()[3]);
        assert!(record.id.is_none());
        assert!(record.messages.is_empty());
        assert_eq!(record.message_count, 0);

        let junk = normalize(&shapes()[4]);
        assert_eq!(junk.title, "Untitled");
        assert!(junk.messages.is_empty());
    }

    #[test]
    fn test_id_precedence() {
        let record = normalize(&json!({ "_id": "", "uniqueId": "u1", "id": "i1" }));
        assert_eq!(record.id.as_deref(), Some("u1"));

        let record = normalize(&json!({ "_id": "a1", "uniqueId": "u1" }));
        assert_eq!(record.id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_title_fallbacks() {
        assert_eq!(normalize(&json!({ "name": "Named" })).title, "Named");
        assert_eq!(normalize(&json!({ "title": "  " })).title, "Untitled");
    }

    #[test]
    fn test_count_never_below_loaded_turns() {
        let record = normalize(&json!({
            "title": "T",
            "messages": [{ "userPrompt": "a" }, { "userPrompt": "b" }],
            "messageCount": 1
        }));
        assert_eq!(record.message_count, 2);
    }

    #[test]
    fn test_array_payload_uses_first_item() {
        let record = normalize(&json!([{ "_id": "first1", "title": "One" }, { "_id": "x" }]));
        assert_eq!(record.id.as_deref(), Some("first1"));
        assert_eq!(normalize(&json!([])).title, "Untitled");
    }
}
