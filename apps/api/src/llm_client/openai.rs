//! OpenAI Chat Completions provider.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiKey;
use crate::llm_client::{
    read_success_body, truncate_for_log, with_deadline, CompletionOptions, LlmClient, LlmError,
    LlmProvider, RawLlmResponse,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    http: Client,
    api_key: ApiKey,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(http: Client, api_key: ApiKey, base_url: Option<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

fn choice_text(response: &ChatResponse) -> Result<String, LlmError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(LlmError::InvalidResponse(
            "completion stopped by content filter".to_string(),
        ));
    }

    let message = choice
        .message
        .as_ref()
        .ok_or_else(|| LlmError::InvalidResponse("choice has no message".to_string()))?;

    if let Some(refusal) = message.refusal.as_deref().filter(|r| !r.trim().is_empty()) {
        return Err(LlmError::InvalidResponse(format!("model refused: {refusal}")));
    }

    match message.content.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(LlmError::InvalidResponse("empty text content".to_string())),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAi
    }

    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        options: &CompletionOptions,
    ) -> Result<RawLlmResponse, LlmError> {
        let request_body = ChatRequest {
            model: &options.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let started = Instant::now();
        let body = with_deadline(options.timeout_ms, async {
            let response = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(self.api_key.expose())
                .json(&request_body)
                .send()
                .await;
            read_success_body(response, options.timeout_ms).await
        })
        .await?;
        let latency = started.elapsed();

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::InvalidResponse(format!(
                "undecodable body ({e}): {}",
                truncate_for_log(&body)
            ))
        })?;
        let text = choice_text(&parsed)?;

        let usage = parsed.usage.as_ref();
        debug!(
            model = %options.model,
            latency_ms = latency.as_millis() as u64,
            input_tokens = usage.and_then(|u| u.prompt_tokens),
            output_tokens = usage.and_then(|u| u.completion_tokens),
            "OpenAI call succeeded"
        );

        Ok(RawLlmResponse {
            text,
            provider: LlmProvider::OpenAi,
            model: parsed.model.clone().unwrap_or_else(|| options.model.clone()),
            latency,
            input_tokens: usage.and_then(|u| u.prompt_tokens),
            output_tokens: usage.and_then(|u| u.completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_stub_server, test_options};
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn client(base_url: String) -> OpenAiClient {
        OpenAiClient::new(Client::new(), ApiKey::new("sk-test"), Some(base_url))
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "parse me");
                assert_eq!(body["response_format"]["type"], "json_object");
                Json(json!({
                    "model": "gpt-test-2024",
                    "choices": [{
                        "message": {"role": "assistant", "content": "{\"education\": []}"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 30, "completion_tokens": 4}
                }))
            }),
        );
        let base_url = spawn_stub_server(router).await;

        let response = client(base_url)
            .complete("parse me", "be json", &test_options())
            .await
            .unwrap();

        assert_eq!(response.text, "{\"education\": []}");
        assert_eq!(response.model, "gpt-test-2024");
        assert_eq!(response.input_tokens, Some(30));
        assert_eq!(response.provider, LlmProvider::OpenAi);
    }

    #[tokio::test]
    async fn test_unauthorized_is_api_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "Incorrect API key provided"}})),
                )
            }),
        );
        let base_url = spawn_stub_server(router).await;

        let err = client(base_url)
            .complete("p", "s", &test_options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { "<html>gateway</html>" }),
        );
        let base_url = spawn_stub_server(router).await;

        let err = client(base_url)
            .complete("p", "s", &test_options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_content_filter_is_invalid_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "{}"}, "finish_reason": "content_filter"}]
        }))
        .unwrap();
        assert!(matches!(
            choice_text(&response),
            Err(LlmError::InvalidResponse(ref m)) if m.contains("content filter")
        ));
    }

    #[test]
    fn test_refusal_is_invalid_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "refusal": "I can't help with that"}}]
        }))
        .unwrap();
        assert!(matches!(
            choice_text(&response),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
