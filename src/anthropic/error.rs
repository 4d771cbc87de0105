//! Error types of the Anthropic API client.
//!
//! [`AnthropicError`] keeps the HTTP-level detail; the conversion into
//! [`RemoteError`] decides which of those failures the retry loop may retry.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors that can occur while talking to the Anthropic API.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` comes from the `retry-after` header.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// HTTP 529, the API is temporarily overloaded.
    #[error("API overloaded: {0}")]
    Overloaded(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// Any other HTTP error (401 invalid key, 400 bad request, 500, ...).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Underlying network failure (DNS, refused connection, bad body).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<AnthropicError> for RemoteError {
    fn from(err: AnthropicError) -> Self {
        match err {
            AnthropicError::RateLimited { .. } | AnthropicError::Overloaded(_) => {
                RemoteError::RateLimited(err.to_string())
            }
            AnthropicError::Timeout => RemoteError::TimedOut(err.to_string()),
            AnthropicError::NetworkError(ref e) if e.is_timeout() => {
                RemoteError::TimedOut(err.to_string())
            }
            AnthropicError::ApiError { .. } | AnthropicError::NetworkError(_) => {
                RemoteError::Fatal(err.to_string())
            }
        }
    }
}
