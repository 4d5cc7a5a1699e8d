//! OpenAI-compatible chat-completion payload types.
//!
//! These model only the fields the gateway itself inspects or mutates
//! (model, messages, stream, tools). Everything else an upstream response
//! carries is passed through as an opaque `serde_json::Value` rather than
//! re-derived field by field, since the gateway never needs to interpret it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message's `content` field: either a plain string or an array of
/// OpenAI-style content parts (text/image). The gateway only needs to
/// canonicalise and forward this, never to interpret individual parts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolCallFunction {
    pub name: String,
    /// Raw JSON-encoded arguments, exactly as the model emitted them.
    pub arguments: String,
}

/// A tool definition injected into the outbound payload's `tools` field,
/// namespaced `mcp.<server>.<tool>` (see `lg-mcp`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolFunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Any additional OpenAI fields the gateway doesn't interpret are kept
    /// so they still reach the upstream unmodified.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatCompletionRequest {
    /// Enforces the data-model invariants from §3: non-empty model, a
    /// non-empty messages array, and a string-typed role on every message.
    pub fn validate(&self) -> AppResult<()> {
        if self.model.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "model must be a non-empty string".into(),
            ));
        }
        if self.messages.is_empty() {
            return Err(AppError::InvalidRequest(
                "messages must be a non-empty array".into(),
            ));
        }
        Ok(())
    }

    /// Canonical fingerprint input for the response cache: model name plus
    /// canonicalised JSON of the messages array, insensitive to whitespace
    /// and object key order.
    pub fn cache_fingerprint(&self) -> AppResult<String> {
        let messages_value = serde_json::to_value(&self.messages)?;
        let canonical = canonicalize_json(&messages_value);
        Ok(format!("{}:{}", self.model, canonical))
    }
}

/// Recursively sorts object keys so that two JSON values differing only in
/// key order or insignificant whitespace canonicalise identically.
fn canonicalize_json(value: &Value) -> String {
    fn sort_value(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort_value(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
            other => other.clone(),
        }
    }
    sort_value(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(messages_json: &str) -> ChatCompletionRequest {
        serde_json::from_str(&format!(
            r#"{{"model":"m","messages":{},"stream":false}}"#,
            messages_json
        ))
        .unwrap()
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let r = req("[]");
        assert!(r.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_model() {
        let mut r = req(r#"[{"role":"user","content":"hi"}]"#);
        r.model = "  ".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn fingerprint_ignores_key_order_and_whitespace() {
        let a = req(r#"[{"role":"user","content":"hi"}]"#);
        let b: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","stream":false,"messages":[{"content":"hi","role":"user"}]}"#,
        )
        .unwrap();
        assert_eq!(a.cache_fingerprint().unwrap(), b.cache_fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_differs_on_content_change() {
        let a = req(r#"[{"role":"user","content":"hi"}]"#);
        let b = req(r#"[{"role":"user","content":"bye"}]"#);
        assert_ne!(a.cache_fingerprint().unwrap(), b.cache_fingerprint().unwrap());
    }
}
