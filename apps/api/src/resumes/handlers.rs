use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::extractors::FileFormat;
use crate::ingestion::StorageError;
use crate::resumes::models::{
    BaseResume, PipelineOutcome, ResumeSummary, Section, SectionKind, UploadedFile,
};
use crate::resumes::repository::RepositoryError;
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => AppError::NotFound(format!("Stored file {key}")),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub filename: String,
    pub source_format: FileFormat,
    pub sections: Vec<Section>,
    pub unrecovered: Vec<SectionKind>,
    pub input_truncated: bool,
    pub warnings: Vec<String>,
}

impl From<BaseResume> for UploadResponse {
    fn from(resume: BaseResume) -> Self {
        let warnings = resume.parsed.warnings();
        Self {
            id: resume.id,
            filename: resume.provenance.filename,
            source_format: resume.provenance.source_format,
            sections: resume.parsed.sections,
            unrecovered: resume.parsed.unrecovered,
            input_truncated: resume.parsed.input_truncated,
            warnings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResumeListResponse {
    pub resumes: Vec<ResumeSummary>,
}

/// POST /api/v1/resumes
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let file = read_upload(multipart).await?;

    match state.resumes.process(file).await {
        PipelineOutcome::Success(resume) => Ok((StatusCode::CREATED, Json(resume.into()))),
        PipelineOutcome::Failure(failure) => Err(AppError::Pipeline(failure)),
    }
}

/// GET /api/v1/resumes
pub async fn handle_list(
    State(state): State<AppState>,
) -> Result<Json<ResumeListResponse>, AppError> {
    let resumes = state.repository.list().await?;
    Ok(Json(ResumeListResponse { resumes }))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BaseResume>, AppError> {
    let resume = state
        .repository
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {id}")))?;
    Ok(Json(resume))
}

/// GET /api/v1/resumes/:id/file
pub async fn handle_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let resume = state
        .repository
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {id}")))?;
    let provenance = &resume.provenance;
    let bytes = state.storage.load(&provenance.storage_key).await?;

    let content_type = provenance
        .content_type
        .clone()
        .filter(|ct| FileFormat::from_content_type(ct) == Some(provenance.source_format))
        .unwrap_or_else(|| provenance.source_format.content_type().to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                header_safe_filename(&provenance.filename)
            ),
        )
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.into()))
}

/// Pulls the `file` field out of the multipart body.
async fn read_upload(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;

        return Ok(UploadedFile::new(filename, content_type, bytes));
    }

    Err(AppError::Validation(format!(
        "Multipart field '{UPLOAD_FIELD}' is required"
    )))
}

/// Keeps printable ASCII minus quotes and backslashes.
fn header_safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim().is_empty() {
        "resume".to_string()
    } else {
        cleaned
    }
}
