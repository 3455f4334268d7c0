//! File text extraction: turns uploaded bytes into plain text.
//!
//! One `TextExtractor` per supported format, selected by the declared format through
//! `ExtractorRegistry`. Content sniffing is only used when the declaration is absent
//! or contradicts itself.

pub mod docx;
pub mod pdf;
pub mod sniff;
pub mod text;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorKind;

/// Content types that say nothing about the payload. Treated as "not declared".
const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Pdf,
    Docx,
    Txt,
}

impl FileFormat {
    pub const ALL: [FileFormat; 3] = [FileFormat::Pdf, FileFormat::Docx, FileFormat::Txt];

    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Pdf => "pdf",
            FileFormat::Docx => "docx",
            FileFormat::Txt => "txt",
        }
    }

    /// Canonical MIME type, used when serving a stored upload back.
    pub fn content_type(self) -> &'static str {
        match self {
            FileFormat::Pdf => "application/pdf",
            FileFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileFormat::Txt => "text/plain",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileFormat::Pdf),
            "docx" => Some(FileFormat::Docx),
            "txt" | "text" => Some(FileFormat::Txt),
            _ => None,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Some(FileFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(FileFormat::Docx)
            }
            "text/plain" => Some(FileFormat::Txt),
            _ => None,
        }
    }

    /// Resolves what the uploader claims the file is from its name and content type.
    ///
    /// The extension wins over an unrecognized content type. Two recognized but
    /// different claims are ambiguous and left to content sniffing.
    pub fn resolve_declared(filename: &str, content_type: Option<&str>) -> DeclaredFormat {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::trim)
            .filter(|e| !e.is_empty());
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .filter(|ct| {
                !GENERIC_CONTENT_TYPES
                    .iter()
                    .any(|generic| ct.eq_ignore_ascii_case(generic))
            });

        let by_extension = extension.map(|e| FileFormat::from_extension(e).ok_or(e));
        let by_content_type =
            content_type.map(|ct| FileFormat::from_content_type(ct).ok_or(ct));

        match (by_extension, by_content_type) {
            (Some(Ok(a)), Some(Ok(b))) if a == b => DeclaredFormat::Known(a),
            (Some(Ok(a)), Some(Ok(b))) => DeclaredFormat::Ambiguous(a, b),
            (Some(Ok(format)), _) | (None, Some(Ok(format))) | (Some(Err(_)), Some(Ok(format))) => {
                DeclaredFormat::Known(format)
            }
            (Some(Err(extension)), _) => {
                DeclaredFormat::Unsupported(format!(".{}", extension.to_ascii_lowercase()))
            }
            (None, Some(Err(content_type))) => DeclaredFormat::Unsupported(content_type.to_string()),
            (None, None) => DeclaredFormat::Undeclared,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileFormat::from_extension(s.trim().trim_start_matches('.'))
            .ok_or_else(|| format!("unknown file format '{s}', expected one of pdf, docx, txt"))
    }
}

/// The uploader's claim about a file's format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredFormat {
    Known(FileFormat),
    /// Extension and content type name two different supported formats.
    Ambiguous(FileFormat, FileFormat),
    Undeclared,
    /// A concrete claim we do not support (e.g. `.exe`).
    Unsupported(String),
}

impl DeclaredFormat {
    /// Settles on one format, sniffing the content at most once when the claim is
    /// missing or ambiguous.
    pub fn resolve(&self, bytes: &[u8]) -> Result<FileFormat, ExtractError> {
        match self {
            DeclaredFormat::Known(format) => Ok(*format),
            DeclaredFormat::Unsupported(declared) => {
                Err(ExtractError::UnsupportedFormat(declared.clone()))
            }
            DeclaredFormat::Undeclared | DeclaredFormat::Ambiguous(..) => sniff::sniff(bytes)
                .ok_or_else(|| {
                    ExtractError::UnsupportedFormat("unrecognized file content".to_string())
                }),
        }
    }
}

/// Plain text pulled out of an upload. `text` is never blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedDocument {
    pub text: String,
    pub source_format: FileFormat,
    pub size_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to extract text from {format} file: {reason}")]
    ExtractionFailed { format: FileFormat, reason: String },

    #[error("{0} file contains no extractable text")]
    EmptyDocument(FileFormat),
}

impl ExtractError {
    pub fn failed(format: FileFormat, reason: impl Into<String>) -> Self {
        ExtractError::ExtractionFailed {
            format,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::UnsupportedFormat(_) => ErrorKind::UnsupportedFileFormat,
            ExtractError::ExtractionFailed { .. } | ExtractError::EmptyDocument(_) => {
                ErrorKind::ExtractionFailed
            }
        }
    }
}

/// Format-specific text extraction. Implementations are pure and must not touch the network.
pub trait TextExtractor: Send + Sync {
    fn format(&self) -> FileFormat;
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(pdf::PdfExtractor),
                Box::new(docx::DocxExtractor),
                Box::new(text::PlainTextExtractor),
            ],
        }
    }

    pub fn extract(
        &self,
        bytes: &[u8],
        declared: &DeclaredFormat,
    ) -> Result<ExtractedDocument, ExtractError> {
        let format = declared.resolve(bytes)?;

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.format() == format)
            .ok_or_else(|| ExtractError::UnsupportedFormat(format.to_string()))?;

        let raw = extractor.extract_text(bytes)?;
        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(ExtractError::EmptyDocument(format));
        }

        tracing::debug!(
            format = %format,
            size_bytes = bytes.len(),
            text_chars = text.chars().count(),
            "Text extracted"
        );

        Ok(ExtractedDocument {
            text,
            source_format: format,
            size_bytes: bytes.len(),
        })
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Unifies line endings, trims trailing whitespace per line and collapses runs of
/// blank lines to one.
fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
