//! Boundary to the remote completion operation.
//!
//! The engine only needs one call, [`Completer::complete`], and a three-way
//! classification of its failures. Everything about the wire format lives in
//! the concrete implementations ([`crate::anthropic::AnthropicClient`] and
//! the offline [`EchoCompleter`]).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::ErrorClass;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One completion call, independent of any provider's wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    /// User and assistant turns, oldest first.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Per-request timeout; `None` keeps the provider default.
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    /// Text of the most recent user turn.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Classified failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    TimedOut(String),

    #[error("{0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited(_) => ErrorClass::RateLimited,
            RemoteError::TimedOut(_) => ErrorClass::TimedOut,
            RemoteError::Fatal(_) => ErrorClass::Fatal,
        }
    }
}

/// The slow, rate-limited, failure-prone operation the engine drives.
pub trait Completer: Send + Sync + 'static {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<Completion, RemoteError>> + Send;
}

/// Offline completer that answers with the last user message.
#[derive(Debug, Clone, Default)]
pub struct EchoCompleter;

impl Completer for EchoCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, RemoteError> {
        let text = request
            .last_user_message()
            .ok_or_else(|| RemoteError::Fatal("no user message to complete".into()))?;
        Ok(Completion {
            text: format!("echo: {text}"),
            model: request.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: "offline".into(),
            system: None,
            messages,
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout: None,
        }
    }

    #[test]
    fn classification() {
        assert_eq!(RemoteError::RateLimited("429".into()).class(), ErrorClass::RateLimited);
        assert_eq!(RemoteError::TimedOut("slow".into()).class(), ErrorClass::TimedOut);
        assert_eq!(RemoteError::Fatal("401".into()).class(), ErrorClass::Fatal);
    }

    #[tokio::test]
    async fn echo_replies_to_last_user_message() {
        let req = request(vec![
            ChatMessage::new(Role::User, "first"),
            ChatMessage::new(Role::Assistant, "echo: first"),
            ChatMessage::new(Role::User, "second"),
        ]);
        let completion = EchoCompleter.complete(&req).await.unwrap();
        assert_eq!(completion.text, "echo: second");
        assert_eq!(completion.model, "offline");
    }

    #[tokio::test]
    async fn echo_without_user_message_is_fatal() {
        let err = EchoCompleter.complete(&request(Vec::new())).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
