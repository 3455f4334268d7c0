/// LLM client: the single point of entry for all provider calls.
///
/// ARCHITECTURAL RULE: No other module may call a provider API directly.
/// Every provider sits behind `LlmClient`; the concrete one is picked once at startup
/// by `build_llm_client` from `LlmConfig.provider`.
///
/// Clients never retry and never cache. Retry policy belongs to the caller.
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::errors::ErrorKind;

pub mod gemini;
pub mod openai;
pub mod prompts;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::OpenAi => "gpt-4o-mini",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Gemini => f.write_str("gemini"),
            LlmProvider::OpenAi => f.write_str("openai"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!(
                "invalid LLM provider '{other}', expected one of gemini, openai"
            )),
        }
    }
}

/// Per-call knobs passed to every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
}

/// Provider output before any interpretation. Never persisted.
#[derive(Debug, Clone)]
pub struct RawLlmResponse {
    pub text: String,
    pub provider: LlmProvider,
    pub model: String,
    pub latency: Duration,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Timeout { .. } => ErrorKind::LlmTimeout,
            LlmError::Http(_) | LlmError::Api { .. } => ErrorKind::Llm,
            LlmError::InvalidResponse(_) => ErrorKind::LlmInvalidResponse,
        }
    }

    /// Transport-class failures are worth another attempt; a well-formed but unusable
    /// answer to the same prompt is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::InvalidResponse(_))
    }

    fn from_transport(error: reqwest::Error, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            LlmError::Timeout { timeout_ms }
        } else {
            LlmError::Http(error)
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> LlmProvider;

    /// Sends one prompt and returns the provider's raw text.
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        options: &CompletionOptions,
    ) -> Result<RawLlmResponse, LlmError>;
}

/// Builds the configured provider client.
pub fn build_llm_client(config: &LlmConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Gemini => Arc::new(gemini::GeminiClient::new(
            http,
            config.api_key.clone(),
            config.base_url.clone(),
        )),
        LlmProvider::OpenAi => Arc::new(openai::OpenAiClient::new(
            http,
            config.api_key.clone(),
            config.base_url.clone(),
        )),
    };
    Ok(client)
}

/// Runs a whole provider exchange (send + body read) under one deadline.
/// On expiry the future is dropped, which aborts the in-flight request and frees
/// its connection.
pub(crate) async fn with_deadline<T, F>(timeout_ms: u64, exchange: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), exchange).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout { timeout_ms }),
    }
}

/// Reads a response body, turning non-2xx statuses into `LlmError::Api`.
pub(crate) async fn read_success_body(
    response: Result<Response, reqwest::Error>,
    timeout_ms: u64,
) -> Result<String, LlmError> {
    let response = response.map_err(|e| LlmError::from_transport(e, timeout_ms))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::from_transport(e, timeout_ms))?;

    if !status.is_success() {
        tracing::warn!("LLM API returned {}: {}", status, truncate_for_log(&body));
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

/// Both Gemini and OpenAI wrap failures as `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub(crate) fn truncate_for_log(text: &str) -> &str {
    const LIMIT: usize = 500;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output, and unwraps a
/// JSON document that was returned inside a quoted string.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let text = if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    };

    for quote in ['\'', '"', '`'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            if inner.starts_with('{') || inner.starts_with('[') {
                return inner.trim();
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_unwraps_quoted_document() {
        let input = "'{\"skills\": [\"Rust\"]}'";
        assert_eq!(strip_json_fences(input), "{\"skills\": [\"Rust\"]}");
    }

    #[test]
    fn test_strip_json_fences_keeps_plain_strings() {
        assert_eq!(strip_json_fences("\"hello\""), "\"hello\"");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Gemini".parse::<LlmProvider>().unwrap(), LlmProvider::Gemini);
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert!("anthropic".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_error_kinds_and_retryability() {
        let timeout = LlmError::Timeout { timeout_ms: 10 };
        assert_eq!(timeout.kind(), ErrorKind::LlmTimeout);
        assert!(timeout.is_retryable());

        let api = LlmError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(api.kind(), ErrorKind::Llm);
        assert!(api.is_retryable());

        let invalid = LlmError::InvalidResponse("empty".into());
        assert_eq!(invalid.kind(), ErrorKind::LlmInvalidResponse);
        assert!(!invalid.is_retryable());
    }

    #[tokio::test]
    async fn test_with_deadline_cancels_slow_exchange() {
        let result: Result<(), LlmError> = with_deadline(20, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { timeout_ms: 20 })));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let text = "é".repeat(600);
        assert_eq!(truncate_for_log(&text).chars().count(), 500);
    }
}
