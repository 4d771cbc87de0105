use std::path::PathBuf;

use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::processor::ProcessError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("No API key. Set ANTHROPIC_API_KEY or `api_key` in watchpool.toml, or pass --offline.")]
    MissingApiKey,

    #[error("Anthropic API error: {0}")]
    Anthropic(#[from] AnthropicError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}
