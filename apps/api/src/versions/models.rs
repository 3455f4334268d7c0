use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resumes::models::Section;

/// A stored resume rewritten for one job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeVersion {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub job_description: String,
    /// `None` when the cover letter call failed; the version is kept regardless.
    pub cover_letter: Option<String>,
    /// Same kinds as the base resume, in the same order.
    pub sections: Vec<Section>,
    pub created_at: DateTime<Utc>,
}

/// Request body for POST /api/v1/resumes/:id/versions
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVersionRequest {
    pub job_description: String,
}
