use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::StageFailure;
use crate::extractors::FileFormat;

/// One upload as received at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// The fixed set of sections a resume is parsed into, in display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Contact,
    Summary,
    Experience,
    Education,
    Skills,
    Projects,
    Certifications,
    Languages,
}

impl SectionKind {
    pub const ALL: [SectionKind; 8] = [
        SectionKind::Contact,
        SectionKind::Summary,
        SectionKind::Experience,
        SectionKind::Education,
        SectionKind::Skills,
        SectionKind::Projects,
        SectionKind::Certifications,
        SectionKind::Languages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Contact => "contact",
            SectionKind::Summary => "summary",
            SectionKind::Experience => "experience",
            SectionKind::Education => "education",
            SectionKind::Skills => "skills",
            SectionKind::Projects => "projects",
            SectionKind::Certifications => "certifications",
            SectionKind::Languages => "languages",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown section kind '{s}'"))
    }
}

/// Shape-normalized section payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SectionContent {
    Fields(Map<String, Value>),
    Text(String),
    Entries(Vec<Value>),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub content: SectionContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResumeData {
    /// At most one section per kind, ordered by `SectionKind`.
    pub sections: Vec<Section>,
    /// Expected kinds the response did not yield.
    pub unrecovered: Vec<SectionKind>,
    pub input_truncated: bool,
}

impl ParsedResumeData {
    /// Human-readable notes for the uploader about what was not recovered.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .unrecovered
            .iter()
            .map(|kind| format!("No {kind} section could be recovered from the resume"))
            .collect();
        if self.input_truncated {
            warnings.push(
                "The resume was too long and only part of it was sent to the parser".to_string(),
            );
        }
        warnings
    }
}

/// Where a resume came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: usize,
    pub source_format: FileFormat,
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Aggregate root produced by one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseResume {
    pub id: Uuid,
    pub provenance: Provenance,
    pub parsed: ParsedResumeData,
}

/// Listing row; omits section bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeSummary {
    pub id: Uuid,
    pub filename: String,
    pub source_format: FileFormat,
    pub section_kinds: Vec<SectionKind>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&BaseResume> for ResumeSummary {
    fn from(resume: &BaseResume) -> Self {
        Self {
            id: resume.id,
            filename: resume.provenance.filename.clone(),
            source_format: resume.provenance.source_format,
            section_kinds: resume.parsed.sections.iter().map(|s| s.kind).collect(),
            uploaded_at: resume.provenance.uploaded_at,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Success(BaseResume),
    Failure(StageFailure),
}
