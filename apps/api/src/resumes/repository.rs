use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::extractors::FileFormat;
use crate::resumes::models::{
    BaseResume, ParsedResumeData, Provenance, ResumeSummary, Section, SectionContent, SectionKind,
};
use crate::versions::models::ResumeVersion;

/// Postgres foreign_key_violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record {0} already exists")]
    Conflict(Uuid),

    #[error("resume {0} does not exist")]
    MissingResume(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored resume is unreadable: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// Persistence boundary for parsed resumes. Receives only complete aggregates.
#[async_trait]
pub trait ResumeRepository: Send + Sync {
    async fn save(&self, resume: &BaseResume) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<ResumeSummary>, RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<BaseResume>, RepositoryError>;

    /// Fails with `MissingResume` when the base resume is not stored.
    async fn save_version(&self, version: &ResumeVersion) -> Result<(), RepositoryError>;

    async fn get_version(&self, id: Uuid) -> Result<Option<ResumeVersion>, RepositoryError>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryResumeRepository {
    resumes: RwLock<Vec<BaseResume>>,
    versions: RwLock<Vec<ResumeVersion>>,
}

impl InMemoryResumeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumeRepository for InMemoryResumeRepository {
    async fn save(&self, resume: &BaseResume) -> Result<(), RepositoryError> {
        let mut resumes = self.resumes.write().await;
        if resumes.iter().any(|r| r.id == resume.id) {
            return Err(RepositoryError::Conflict(resume.id));
        }
        resumes.push(resume.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResumeSummary>, RepositoryError> {
        let resumes = self.resumes.read().await;
        let mut summaries: Vec<ResumeSummary> =
            resumes.iter().rev().map(ResumeSummary::from).collect();
        summaries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(summaries)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BaseResume>, RepositoryError> {
        let resumes = self.resumes.read().await;
        Ok(resumes.iter().find(|r| r.id == id).cloned())
    }

    async fn save_version(&self, version: &ResumeVersion) -> Result<(), RepositoryError> {
        if !self.resumes.read().await.iter().any(|r| r.id == version.resume_id) {
            return Err(RepositoryError::MissingResume(version.resume_id));
        }
        let mut versions = self.versions.write().await;
        if versions.iter().any(|v| v.id == version.id) {
            return Err(RepositoryError::Conflict(version.id));
        }
        versions.push(version.clone());
        Ok(())
    }

    async fn get_version(&self, id: Uuid) -> Result<Option<ResumeVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions.iter().find(|v| v.id == id).cloned())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgResumeRepository {
    pool: PgPool,
}

impl PgResumeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ResumeRow {
    id: Uuid,
    filename: String,
    content_type: Option<String>,
    size_bytes: i64,
    source_format: String,
    storage_key: String,
    unrecovered: Vec<String>,
    input_truncated: bool,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SectionRow {
    kind: String,
    content: serde_json::Value,
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    id: Uuid,
    filename: String,
    source_format: String,
    uploaded_at: DateTime<Utc>,
    section_kinds: Vec<String>,
}

#[derive(Debug, FromRow)]
struct VersionRow {
    id: Uuid,
    resume_id: Uuid,
    job_description: String,
    cover_letter: Option<String>,
    created_at: DateTime<Utc>,
}

fn parse_format(raw: &str) -> Result<FileFormat, RepositoryError> {
    FileFormat::from_str(raw).map_err(RepositoryError::Corrupt)
}

fn parse_kinds(raw: &[String]) -> Result<Vec<SectionKind>, RepositoryError> {
    raw.iter()
        .map(|k| SectionKind::from_str(k).map_err(RepositoryError::Corrupt))
        .collect()
}

fn parse_sections(rows: Vec<SectionRow>) -> Result<Vec<Section>, RepositoryError> {
    rows.into_iter()
        .map(|row| {
            Ok(Section {
                kind: SectionKind::from_str(&row.kind).map_err(RepositoryError::Corrupt)?,
                content: serde_json::from_value::<SectionContent>(row.content)
                    .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            })
        })
        .collect()
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
    )
}

impl VersionRow {
    fn into_version(self, sections: Vec<SectionRow>) -> Result<ResumeVersion, RepositoryError> {
        Ok(ResumeVersion {
            id: self.id,
            resume_id: self.resume_id,
            job_description: self.job_description,
            cover_letter: self.cover_letter,
            sections: parse_sections(sections)?,
            created_at: self.created_at,
        })
    }
}

impl ResumeRow {
    fn into_resume(self, sections: Vec<SectionRow>) -> Result<BaseResume, RepositoryError> {
        let sections = parse_sections(sections)?;

        Ok(BaseResume {
            id: self.id,
            provenance: Provenance {
                filename: self.filename,
                content_type: self.content_type,
                size_bytes: usize::try_from(self.size_bytes)
                    .map_err(|_| RepositoryError::Corrupt("negative size_bytes".to_string()))?,
                source_format: parse_format(&self.source_format)?,
                storage_key: self.storage_key,
                uploaded_at: self.uploaded_at,
            },
            parsed: ParsedResumeData {
                sections,
                unrecovered: parse_kinds(&self.unrecovered)?,
                input_truncated: self.input_truncated,
            },
        })
    }
}

#[async_trait]
impl ResumeRepository for PgResumeRepository {
    async fn save(&self, resume: &BaseResume) -> Result<(), RepositoryError> {
        let provenance = &resume.provenance;
        let unrecovered: Vec<String> = resume
            .parsed
            .unrecovered
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO resumes \
             (id, filename, content_type, size_bytes, source_format, storage_key, \
              unrecovered, input_truncated, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(resume.id)
        .bind(&provenance.filename)
        .bind(&provenance.content_type)
        .bind(provenance.size_bytes as i64)
        .bind(provenance.source_format.as_str())
        .bind(&provenance.storage_key)
        .bind(&unrecovered)
        .bind(resume.parsed.input_truncated)
        .bind(provenance.uploaded_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(resume.id));
        }

        for (position, section) in resume.parsed.sections.iter().enumerate() {
            let content = serde_json::to_value(&section.content)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
            sqlx::query(
                "INSERT INTO resume_sections (resume_id, kind, position, content) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(resume.id)
            .bind(section.kind.as_str())
            .bind(position as i16)
            .bind(content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            resume_id = %resume.id,
            sections = resume.parsed.sections.len(),
            "Resume persisted"
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResumeSummary>, RepositoryError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT r.id, r.filename, r.source_format, r.uploaded_at, \
                    COALESCE(array_agg(s.kind ORDER BY s.position) \
                             FILTER (WHERE s.kind IS NOT NULL), '{}') AS section_kinds \
             FROM resumes r \
             LEFT JOIN resume_sections s ON s.resume_id = r.id \
             GROUP BY r.id \
             ORDER BY r.uploaded_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ResumeSummary {
                    id: row.id,
                    filename: row.filename,
                    source_format: parse_format(&row.source_format)?,
                    section_kinds: parse_kinds(&row.section_kinds)?,
                    uploaded_at: row.uploaded_at,
                })
            })
            .collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<BaseResume>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let sections = sqlx::query_as::<_, SectionRow>(
            "SELECT kind, content FROM resume_sections WHERE resume_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        row.into_resume(sections).map(Some)
    }

    async fn save_version(&self, version: &ResumeVersion) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO resume_versions \
             (id, resume_id, job_description, cover_letter, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(version.id)
        .bind(version.resume_id)
        .bind(&version.job_description)
        .bind(&version.cover_letter)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                RepositoryError::MissingResume(version.resume_id)
            } else {
                RepositoryError::Database(e)
            }
        })?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(version.id));
        }

        for (position, section) in version.sections.iter().enumerate() {
            let content = serde_json::to_value(&section.content)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
            sqlx::query(
                "INSERT INTO resume_version_sections (version_id, kind, position, content) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(version.id)
            .bind(section.kind.as_str())
            .bind(position as i16)
            .bind(content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            version_id = %version.id,
            resume_id = %version.resume_id,
            "Resume version persisted"
        );
        Ok(())
    }

    async fn get_version(&self, id: Uuid) -> Result<Option<ResumeVersion>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, VersionRow>(
            "SELECT id, resume_id, job_description, cover_letter, created_at \
             FROM resume_versions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let sections = sqlx::query_as::<_, SectionRow>(
            "SELECT kind, content FROM resume_version_sections \
             WHERE version_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        row.into_version(sections).map(Some)
    }
}
