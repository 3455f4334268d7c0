use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::LlmConfig;
use crate::errors::ErrorKind;
use crate::extractors::ExtractedDocument;
use crate::llm_client::{CompletionOptions, LlmClient, LlmError, RawLlmResponse};
use crate::parsing::mapper::{map_response, MapError};
use crate::parsing::prompts::{build_parse_prompt, BudgetTooSmall, ParsingPrompt};
use crate::resumes::models::ParsedResumeData;

/// Steps of one parse, recorded on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    BuildingPrompt,
    AwaitingLlm,
    MappingResponse,
    Done,
    Failed,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseStage::BuildingPrompt => "building_prompt",
            ParseStage::AwaitingLlm => "awaiting_llm",
            ParseStage::MappingResponse => "mapping_response",
            ParseStage::Done => "done",
            ParseStage::Failed => "failed",
        })
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("prompt could not be built: {0}")]
    Prompt(#[from] BudgetTooSmall),

    #[error("LLM returned an unusable response on attempt {attempt}: {source}")]
    InvalidResponse {
        attempt: u32,
        #[source]
        source: LlmError,
    },

    #[error("LLM call failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("could not map LLM response: {0}")]
    Mapping(#[from] MapError),
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::InvalidResponse { source, .. } => source.kind(),
            ParseError::Prompt(_) | ParseError::RetriesExhausted { .. } | ParseError::Mapping(_) => {
                ErrorKind::ParsingFailed
            }
        }
    }
}

/// LLM knobs the parser needs, taken from `LlmConfig`.
#[derive(Debug, Clone)]
pub struct ParsingConfig {
    pub options: CompletionOptions,
    pub max_retries: u32,
    pub max_input_tokens: usize,
    pub retry_backoff: Duration,
}

impl From<&LlmConfig> for ParsingConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            options: config.completion_options(),
            max_retries: config.max_retries,
            max_input_tokens: config.max_input_tokens,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct ParsingService {
    llm: Arc<dyn LlmClient>,
    config: ParsingConfig,
}

impl ParsingService {
    pub fn new(llm: Arc<dyn LlmClient>, config: ParsingConfig) -> Self {
        Self { llm, config }
    }

    #[instrument(skip(self, document), fields(
        provider = %self.llm.provider(),
        format = %document.source_format,
        text_chars = document.text.chars().count(),
    ))]
    pub async fn parse(&self, document: &ExtractedDocument) -> Result<ParsedResumeData, ParseError> {
        debug!(stage = %ParseStage::BuildingPrompt);
        let prompt = build_parse_prompt(document, self.config.max_input_tokens).map_err(|e| {
            warn!(stage = %ParseStage::Failed, error = %e, "Could not build prompt");
            ParseError::from(e)
        })?;
        if prompt.truncated {
            warn!(
                estimated_tokens = prompt.estimated_tokens,
                max_input_tokens = self.config.max_input_tokens,
                "Resume text truncated to fit the input budget"
            );
        }

        let response = match self.call_with_retries(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(stage = %ParseStage::Failed, error = %e, "LLM call failed");
                return Err(e);
            }
        };

        debug!(stage = %ParseStage::MappingResponse, response_chars = response.text.len());
        let mapped = map_response(&response.text).map_err(|e| {
            warn!(stage = %ParseStage::Failed, error = %e, "Could not map LLM response");
            ParseError::from(e)
        })?;

        info!(
            stage = %ParseStage::Done,
            provider = %response.provider,
            model = %response.model,
            latency_ms = response.latency.as_millis() as u64,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            sections = mapped.sections.len(),
            unrecovered = mapped.unrecovered.len(),
            "Resume parsed"
        );

        Ok(ParsedResumeData {
            sections: mapped.sections,
            unrecovered: mapped.unrecovered,
            input_truncated: prompt.truncated,
        })
    }

    /// Up to `max_retries + 1` sequential attempts with doubling backoff. Unusable
    /// responses are returned at once; asking again rarely fixes them.
    async fn call_with_retries(&self, prompt: &ParsingPrompt) -> Result<RawLlmResponse, ParseError> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(stage = %ParseStage::AwaitingLlm, attempt, max_attempts);

            match self
                .llm
                .complete(&prompt.user, &prompt.system, &self.config.options)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => {
                    return Err(ParseError::InvalidResponse {
                        attempt,
                        source: e,
                    })
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(ParseError::RetriesExhausted {
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
}
