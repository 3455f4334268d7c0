use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::errors::{AppError, Stage, StageFailure};
use crate::state::AppState;
use crate::versions::models::{CreateVersionRequest, ResumeVersion};
use crate::versions::service::VersionError;

impl From<VersionError> for AppError {
    fn from(e: VersionError) -> Self {
        match e {
            VersionError::ResumeNotFound(id) => AppError::NotFound(format!("Resume {id}")),
            VersionError::Validation(msg) => AppError::Validation(msg),
            other => AppError::Pipeline(StageFailure::new(
                Stage::Customization,
                other.kind(),
                other.to_string(),
            )),
        }
    }
}

/// POST /api/v1/resumes/:id/versions
pub async fn handle_create_version(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
    Json(request): Json<CreateVersionRequest>,
) -> Result<(StatusCode, Json<ResumeVersion>), AppError> {
    let version = state
        .versions
        .create_version(resume_id, &request.job_description)
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// GET /api/v1/resumes/versions/:version_id
pub async fn handle_get_version(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<Json<ResumeVersion>, AppError> {
    let version = state
        .versions
        .get_version(version_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume version {version_id}")))?;
    Ok(Json(version))
}
