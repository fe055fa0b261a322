//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;

const PROVIDER: &str = "anthropic";
const API_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// [`LlmProvider`] backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.expose_secret()).map_err(|_| {
                LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                }
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: API_BASE_URL.to_string(),
            max_retries: 1,
        })
    }

    /// Point the client at a different endpoint (local stand-ins in tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// One HTTP round trip. The error side carries whether a retry may help.
    async fn send_once(&self, request: &MessageRequest<'_>) -> Result<String, (LlmError, bool)> {
        let response = self
            .client
            .post(&self.base_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                (
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: format!("HTTP request failed: {e}"),
                    },
                    e.is_timeout() || e.is_connect(),
                )
            })?;

        let status = response.status();
        debug!(status = %status, "Anthropic response received");

        if status.is_success() {
            let body: MessageResponse = response.json().await.map_err(|e| {
                (
                    LlmError::InvalidResponse {
                        provider: PROVIDER.to_string(),
                        reason: format!("failed to parse response: {e}"),
                    },
                    false,
                )
            })?;
            return extract_text(body).map_err(|e| (e, false));
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err((
                LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                },
                false,
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err((
                    LlmError::RateLimited {
                        provider: PROVIDER.to_string(),
                        retry_after,
                    },
                    true,
                ))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                let reason = match serde_json::from_str::<ApiErrorResponse>(&body) {
                    Ok(api_err) => format!(
                        "Anthropic API error ({}): {}",
                        api_err.error.kind, api_err.error.message
                    ),
                    Err(_) => format!("API returned {status}: {body}"),
                };
                Err((
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason,
                    },
                    is_transient_status(status),
                ))
            }
        }
    }
}

fn extract_text(response: MessageResponse) -> Result<String, LlmError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "response contained no text".to_string(),
        });
    }
    Ok(text)
}

/// 500, 503 and 529 (overloaded) are worth one retry.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 503 | 529)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system_prompt: &str, user_content: &str) -> Result<String, LlmError> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt,
            messages: [RequestMessage {
                role: "user",
                content: user_content,
            }],
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(text) => return Ok(text),
                Err((e, true)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Transient LLM error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err((e, _)) => return Err(e),
            }
        }
    }
}
