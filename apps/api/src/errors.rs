use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Stable classification shared by every pipeline error.
/// The HTTP layer decides status codes and messages from this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    UnsupportedFileFormat,
    ExtractionFailed,
    LlmTimeout,
    Llm,
    LlmInvalidResponse,
    ParsingFailed,
    Storage,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::UnsupportedFileFormat => "UNSUPPORTED_FILE_FORMAT",
            ErrorKind::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorKind::LlmTimeout => "LLM_TIMEOUT",
            ErrorKind::Llm => "LLM_ERROR",
            ErrorKind::LlmInvalidResponse => "LLM_INVALID_RESPONSE",
            ErrorKind::ParsingFailed => "PARSING_FAILED",
            ErrorKind::Storage => "STORAGE_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation
            | ErrorKind::UnsupportedFileFormat
            | ErrorKind::ExtractionFailed => StatusCode::BAD_REQUEST,
            ErrorKind::LlmTimeout
            | ErrorKind::Llm
            | ErrorKind::LlmInvalidResponse
            | ErrorKind::ParsingFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the uploader. Never includes provider or storage internals.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "The uploaded file was rejected. Please check it and try again.",
            ErrorKind::UnsupportedFileFormat => {
                "This file format is not supported. Please upload a PDF, DOCX or TXT file."
            }
            ErrorKind::ExtractionFailed => {
                "The file could not be read. It may be corrupt; please re-upload it."
            }
            ErrorKind::LlmTimeout => "The resume parser timed out. Please try again later.",
            ErrorKind::Llm => "The resume parser is unavailable. Please try again later.",
            ErrorKind::LlmInvalidResponse => "The resume parser returned an unusable result.",
            ErrorKind::ParsingFailed => "The resume could not be parsed into sections.",
            ErrorKind::Storage => "A storage error occurred.",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Parsing,
    Persistence,
    /// Tailoring a stored resume to a job description.
    Customization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingestion => f.write_str("ingestion"),
            Stage::Parsing => f.write_str("parsing"),
            Stage::Persistence => f.write_str("persistence"),
            Stage::Customization => f.write_str("customization"),
        }
    }
}

/// Flattened failure of one pipeline run: which stage failed and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage, self.kind, self.message)
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pipeline error: {0}")]
    Pipeline(StageFailure),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, stage) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation.code(),
                msg.clone(),
                None,
            ),
            AppError::Pipeline(failure) => {
                if failure.kind.status().is_server_error() {
                    tracing::error!(stage = %failure.stage, kind = %failure.kind, "Pipeline failure: {}", failure.message);
                } else {
                    tracing::warn!(stage = %failure.stage, kind = %failure.kind, "Request rejected: {}", failure.message);
                }
                let message = match failure.kind {
                    // Client-side problems carry the precise reason back to the uploader.
                    ErrorKind::Validation | ErrorKind::UnsupportedFileFormat => {
                        failure.message.clone()
                    }
                    kind => kind.user_message().to_string(),
                };
                (
                    failure.kind.status(),
                    failure.kind.code(),
                    message,
                    Some(failure.stage),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Storage.code(),
                    ErrorKind::Storage.user_message().to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "stage": stage,
            }
        }));

        (status, body).into_response()
    }
}
