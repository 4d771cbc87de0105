//! Per-column chat state.
//!
//! A [`Conversation`] is what one SubTask's commands act on: the message
//! history plus the sampling parameters of the next completion. Parameter
//! commands never leave this struct; only [`Conversation::request`] produces
//! something for the remote side.

use std::time::Duration;

use crate::command::Command;
use crate::remote::{ChatMessage, CompletionRequest, Role};

/// System prompt appended by a `system` command without argument.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You're a kind helpful assistant";

/// Starting values of a conversation, taken from the pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDefaults {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub retries: i64,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    defaults: ConversationDefaults,
    history: Vec<ChatMessage>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    timeout: Option<Duration>,
    retries: i64,
}

impl Conversation {
    pub fn new(defaults: ConversationDefaults) -> Self {
        Self {
            history: Vec::new(),
            model: defaults.model.clone(),
            max_tokens: defaults.max_tokens,
            temperature: None,
            top_p: None,
            timeout: defaults.timeout,
            retries: defaults.retries,
            defaults,
        }
    }

    /// Apply a local command. [`Command::Complete`] is left to the caller,
    /// which performs the remote call and hands the answer to
    /// [`Conversation::push_reply`].
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::User(text) => self.history.push(ChatMessage::new(Role::User, text.as_str())),
            Command::System(text) => {
                let text = text.as_deref().unwrap_or(DEFAULT_SYSTEM_MESSAGE);
                self.history.push(ChatMessage::new(Role::System, text));
            }
            Command::Complete => {}
            Command::MaxTokens(v) => self.max_tokens = v.or(self.defaults.max_tokens),
            Command::Temperature(v) => self.temperature = *v,
            Command::TopP(v) => self.top_p = *v,
            Command::Timeout(v) => {
                self.timeout = v.map(Duration::from_secs).or(self.defaults.timeout);
            }
            Command::Retries(v) => self.retries = v.unwrap_or(self.defaults.retries),
            Command::Model(v) => {
                self.model = v.clone().unwrap_or_else(|| self.defaults.model.clone());
            }
            Command::Clear => self.history.clear(),
            Command::Reset => *self = Self::new(self.defaults.clone()),
        }
    }

    /// Snapshot of the conversation as a completion request. System messages
    /// are joined into the request's system prompt in order of appearance.
    pub fn request(&self) -> CompletionRequest {
        let system: Vec<&str> = self
            .history
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        CompletionRequest {
            model: self.model.clone(),
            system: (!system.is_empty()).then(|| system.join("\n")),
            messages: self
                .history
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned()
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            timeout: self.timeout,
        }
    }

    pub fn push_reply(&mut self, text: impl Into<String>) {
        self.history.push(ChatMessage::new(Role::Assistant, text));
    }

    /// Retry budget of the next completion.
    pub fn retries(&self) -> i64 {
        self.retries
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
