//! Google Gemini `generateContent` provider.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ApiKey;
use crate::llm_client::{
    read_success_body, truncate_for_log, with_deadline, CompletionOptions, LlmClient, LlmError,
    LlmProvider, RawLlmResponse,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    http: Client,
    api_key: ApiKey,
    base_url: String,
}

impl GeminiClient {
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

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Concatenates the text parts of the first candidate.
fn candidate_text(response: &GenerateContentResponse) -> Result<String, LlmError> {
    let Some(candidate) = response.candidates.first() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .map(|r| format!("prompt blocked ({r})"))
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(LlmError::InvalidResponse(reason));
    };

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    match candidate.finish_reason.as_deref() {
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            return Err(LlmError::InvalidResponse(format!(
                "candidate stopped by provider filter ({})",
                candidate.finish_reason.as_deref().unwrap_or_default()
            )));
        }
        Some("MAX_TOKENS") => warn!("Gemini response hit max output tokens; JSON may be cut off"),
        _ => {}
    }

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse("empty text content".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::Gemini
    }

    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        options: &CompletionOptions,
    ) -> Result<RawLlmResponse, LlmError> {
        let request_body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system }],
            },
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        let started = Instant::now();
        let body = with_deadline(options.timeout_ms, async {
            let response = self
                .http
                .post(self.endpoint(&options.model))
                .header("x-goog-api-key", self.api_key.expose())
                .json(&request_body)
                .send()
                .await;
            read_success_body(response, options.timeout_ms).await
        })
        .await?;
        let latency = started.elapsed();

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::InvalidResponse(format!(
                "undecodable body ({e}): {}",
                truncate_for_log(&body)
            ))
        })?;
        let text = candidate_text(&parsed)?;

        let usage = parsed.usage_metadata.as_ref();
        debug!(
            model = %options.model,
            latency_ms = latency.as_millis() as u64,
            input_tokens = usage.and_then(|u| u.prompt_token_count),
            output_tokens = usage.and_then(|u| u.candidates_token_count),
            "Gemini call succeeded"
        );

        Ok(RawLlmResponse {
            text,
            provider: LlmProvider::Gemini,
            model: parsed
                .model_version
                .clone()
                .unwrap_or_else(|| options.model.clone()),
            latency,
            input_tokens: usage.and_then(|u| u.prompt_token_count),
            output_tokens: usage.and_then(|u| u.candidates_token_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_stub_server, test_options};
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    fn client(base_url: String) -> GeminiClient {
        GeminiClient::new(Client::new(), ApiKey::new("test-key"), Some(base_url))
    }

    #[tokio::test]
    async fn test_complete_returns_candidate_text() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(
                |Path(call): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(call, "gemini-test:generateContent");
                    assert_eq!(headers["x-goog-api-key"], "test-key");
                    assert_eq!(body["contents"][0]["parts"][0]["text"], "parse me");
                    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be json");
                    assert_eq!(
                        body["generationConfig"]["responseMimeType"],
                        "application/json"
                    );
                    Json(json!({
                        "candidates": [{
                            "content": {"parts": [{"text": "{\"skills\":"}, {"text": " [\"Rust\"]}"}]},
                            "finishReason": "STOP"
                        }],
                        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5},
                        "modelVersion": "gemini-test-001"
                    }))
                },
            ),
        );
        let base_url = spawn_stub_server(router).await;

        let mut options = test_options();
        options.model = "gemini-test".to_string();
        let response = client(base_url)
            .complete("parse me", "be json", &options)
            .await
            .unwrap();

        assert_eq!(response.text, "{\"skills\": [\"Rust\"]}");
        assert_eq!(response.model, "gemini-test-001");
        assert_eq!(response.input_tokens, Some(12));
        assert_eq!(response.output_tokens, Some(5));
        assert_eq!(response.provider, LlmProvider::Gemini);
    }

    #[tokio::test]
    async fn test_rate_limit_is_api_error() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {"code": 429, "message": "Resource exhausted"}})),
                )
            }),
        );
        let base_url = spawn_stub_server(router).await;

        let err = client(base_url)
            .complete("p", "s", &test_options())
            .await
            .unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Resource exhausted");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_response() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|| async { Json(json!({"promptFeedback": {"blockReason": "SAFETY"}})) }),
        );
        let base_url = spawn_stub_server(router).await;

        let err = client(base_url)
            .complete("p", "s", &test_options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(ref m) if m.contains("SAFETY")));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Json(json!({}))
            }),
        );
        let base_url = spawn_stub_server(router).await;

        let mut options = test_options();
        options.timeout_ms = 100;
        let err = client(base_url)
            .complete("p", "s", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { timeout_ms: 100 }));
    }

    #[test]
    fn test_candidate_text_rejects_blank_output() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "  "}]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert!(matches!(
            candidate_text(&response),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
