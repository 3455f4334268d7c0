//! Resume customization: rewrites a stored resume's sections for one job description
//! and drafts a matching cover letter.
//!
//! Flow: load base resume → customization LLM call → map_response → keep base kinds
//! only → cover letter LLM call (best effort) → persist version.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::llm_client::{strip_json_fences, CompletionOptions, LlmClient, LlmError};
use crate::parsing::mapper::{map_response, MapError};
use crate::resumes::models::Section;
use crate::resumes::repository::{RepositoryError, ResumeRepository};
use crate::versions::models::ResumeVersion;
use crate::versions::prompts::{
    build_cover_letter_prompt, build_customization_prompt, COVER_LETTER_SYSTEM, CUSTOMIZE_SYSTEM,
};

/// Longest job description accepted, in characters.
pub const MAX_JOB_DESCRIPTION_CHARS: usize = 20_000;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("{0}")]
    Validation(String),

    #[error("resume {0} not found")]
    ResumeNotFound(Uuid),

    #[error("customization call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("could not map customized sections: {0}")]
    Mapping(#[from] MapError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl VersionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VersionError::Validation(_) | VersionError::ResumeNotFound(_) => ErrorKind::Validation,
            VersionError::Llm(e) => e.kind(),
            VersionError::Mapping(_) => ErrorKind::ParsingFailed,
            VersionError::Repository(e) => e.kind(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoverLetterResponse {
    cover_letter: String,
}

pub struct VersionService {
    llm: Arc<dyn LlmClient>,
    repository: Arc<dyn ResumeRepository>,
    options: CompletionOptions,
}

impl VersionService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        repository: Arc<dyn ResumeRepository>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            llm,
            repository,
            options,
        }
    }

    #[instrument(skip(self, job_description), fields(job_description_chars = job_description.chars().count()))]
    pub async fn create_version(
        &self,
        resume_id: Uuid,
        job_description: &str,
    ) -> Result<ResumeVersion, VersionError> {
        let job_description = job_description.trim();
        check_job_description(job_description)?;

        let resume = self
            .repository
            .get(resume_id)
            .await?
            .ok_or(VersionError::ResumeNotFound(resume_id))?;
        let base = &resume.parsed.sections;
        if base.is_empty() {
            return Err(VersionError::Validation(
                "Resume has no sections to customize".to_string(),
            ));
        }

        let sections = self.customize_sections(base, job_description).await?;
        let cover_letter = self.write_cover_letter(base, job_description).await;

        let version = ResumeVersion {
            id: Uuid::new_v4(),
            resume_id,
            job_description: job_description.to_string(),
            cover_letter,
            sections,
            created_at: Utc::now(),
        };
        self.repository.save_version(&version).await?;

        info!(
            version_id = %version.id,
            sections = version.sections.len(),
            has_cover_letter = version.cover_letter.is_some(),
            "Resume version created"
        );
        Ok(version)
    }

    pub async fn get_version(&self, id: Uuid) -> Result<Option<ResumeVersion>, VersionError> {
        Ok(self.repository.get_version(id).await?)
    }

    /// One customized section per base section; kinds the model skipped keep their
    /// base content, kinds the base resume lacks are discarded.
    async fn customize_sections(
        &self,
        base: &[Section],
        job_description: &str,
    ) -> Result<Vec<Section>, VersionError> {
        let prompt = build_customization_prompt(base, job_description);
        let response = self
            .llm
            .complete(&prompt, CUSTOMIZE_SYSTEM, &self.options)
            .await?;
        let mapped = map_response(&response.text)?;

        let mut customized = 0usize;
        let sections: Vec<Section> = base
            .iter()
            .map(|section| {
                match mapped.sections.iter().find(|s| s.kind == section.kind) {
                    Some(tailored) => {
                        customized += 1;
                        tailored.clone()
                    }
                    None => section.clone(),
                }
            })
            .collect();

        let invented = mapped
            .sections
            .iter()
            .filter(|s| !base.iter().any(|b| b.kind == s.kind))
            .count();
        if invented > 0 {
            warn!(invented, "Dropped customized sections the base resume does not have");
        }
        if customized == 0 {
            let seen: Vec<&str> = mapped.sections.iter().map(|s| s.kind.as_str()).collect();
            return Err(VersionError::Mapping(MapError::NoSections(seen.join(", "))));
        }
        if customized < base.len() {
            warn!(
                customized,
                total = base.len(),
                "Some sections were not customized; keeping base content"
            );
        }
        Ok(sections)
    }

    /// Best effort: a failed or unusable answer yields `None`.
    async fn write_cover_letter(&self, base: &[Section], job_description: &str) -> Option<String> {
        let prompt = build_cover_letter_prompt(base, job_description);
        let response = match self
            .llm
            .complete(&prompt, COVER_LETTER_SYSTEM, &self.options)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Cover letter generation failed, continuing without it");
                return None;
            }
        };

        let letter = parse_cover_letter(&response.text);
        if letter.is_none() {
            warn!("Cover letter response had no usable `cover_letter` field");
        }
        letter
    }
}

fn check_job_description(job_description: &str) -> Result<(), VersionError> {
    if job_description.is_empty() {
        return Err(VersionError::Validation(
            "job_description must not be empty".to_string(),
        ));
    }
    let chars = job_description.chars().count();
    if chars > MAX_JOB_DESCRIPTION_CHARS {
        return Err(VersionError::Validation(format!(
            "job_description is {chars} characters; the limit is {MAX_JOB_DESCRIPTION_CHARS}"
        )));
    }
    Ok(())
}

fn parse_cover_letter(raw: &str) -> Option<String> {
    serde_json::from_str::<CoverLetterResponse>(strip_json_fences(raw))
        .ok()
        .map(|r| r.cover_letter.trim().to_string())
        .filter(|letter| !letter.is_empty())
}
