//! Request and response bodies of the Anthropic Messages API.
//!
//! All structs derive `Serialize` and `Deserialize` to match the JSON shape of
//! the `v1/messages` endpoint. Optional sampling parameters are omitted from
//! the body when unset so the API applies its own defaults.

use serde::{Deserialize, Serialize};

use crate::remote::{CompletionRequest, Role};

/// Body of a `POST /v1/messages` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Model identifier (e.g. "claude-sonnet-4-5-20250929").
    pub model: String,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// System prompt, sent outside the message list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Conversation turns, alternating user and assistant.
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl MessagesRequest {
    /// Build the wire request, using `default_max_tokens` when the
    /// conversation did not set a limit (the API requires one).
    pub fn from_completion(request: &CompletionRequest, default_max_tokens: u32) -> Self {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Message {
                role: match m.role {
                    Role::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: m.content.clone(),
            })
            .collect();

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(default_max_tokens),
            system: request.system.clone(),
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
        }
    }
}

/// A single message of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// Body of a successful `/v1/messages` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    /// Generated content blocks (normally text).
    pub content: Vec<ContentBlock>,
    pub model: String,
    /// Why generation stopped ("end_turn", "max_tokens", ...).
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl MessagesResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text.as_str())
            .collect()
    }
}

/// A content block of the response.
///
/// `content_type` is serialized as `"type"` to follow the API format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// Token usage of one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
