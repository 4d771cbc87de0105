use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use super::error::AnthropicError;
use super::types::{MessagesRequest, MessagesResponse};
use crate::remote::{Completer, Completion, CompletionRequest, RemoteError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Sent when a conversation never set `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// HTTP 529, returned by the API while overloaded.
const OVERLOADED: u16 = 529;

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
    default_max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    ///
    /// No overall timeout is configured on the client; requests either carry
    /// their own or wait for the server.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, AnthropicError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
            default_max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub async fn send_message(
        &self,
        req: &MessagesRequest,
        timeout: Option<Duration>,
    ) -> Result<MessagesResponse, AnthropicError> {
        let mut builder = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(req);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(timeout_aware)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AnthropicError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status.as_u16() == OVERLOADED {
                return Err(AnthropicError::Overloaded(message));
            }
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(timeout_aware)?;
        debug!(
            model = %body.model,
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "message completed"
        );
        Ok(body)
    }
}

fn timeout_aware(err: reqwest::Error) -> AnthropicError {
    if err.is_timeout() {
        AnthropicError::Timeout
    } else {
        AnthropicError::NetworkError(err)
    }
}

impl Completer for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, RemoteError> {
        let body = MessagesRequest::from_completion(request, self.default_max_tokens);
        let response = self.send_message(&body, request.timeout).await?;
        Ok(Completion {
            text: response.text(),
            model: response.model,
        })
    }
}
