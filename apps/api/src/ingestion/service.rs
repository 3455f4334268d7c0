use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::UploadLimits;
use crate::errors::ErrorKind;
use crate::extractors::{
    DeclaredFormat, ExtractError, ExtractedDocument, ExtractorRegistry, FileFormat,
};
use crate::ingestion::storage::{FileStorage, StorageError};
use crate::resumes::models::UploadedFile;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::UnsupportedFormat(_) => ErrorKind::UnsupportedFileFormat,
            IngestError::Storage(e) => e.kind(),
            IngestError::Extract(e) => e.kind(),
        }
    }
}

/// Output of a successful ingestion: the text plus where the raw bytes were kept.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: ExtractedDocument,
    pub storage_key: String,
}

pub struct IngestionService {
    limits: UploadLimits,
    storage: Arc<dyn FileStorage>,
    registry: Arc<ExtractorRegistry>,
}

impl IngestionService {
    pub fn new(
        limits: UploadLimits,
        storage: Arc<dyn FileStorage>,
        registry: Arc<ExtractorRegistry>,
    ) -> Self {
        Self {
            limits,
            storage,
            registry,
        }
    }

    /// Validates, stores and extracts one upload, failing on the first violated check.
    #[instrument(skip(self, file), fields(filename = %file.filename, size_bytes = file.size()))]
    pub async fn ingest(&self, file: &UploadedFile) -> Result<IngestedDocument, IngestError> {
        self.check_size(file)?;
        let format = self.check_format(file)?;

        let storage_key = self
            .storage
            .save(&file.filename, file.bytes.clone())
            .await?;

        let registry = Arc::clone(&self.registry);
        let bytes = file.bytes.clone();
        let document = tokio::task::spawn_blocking(move || {
            registry.extract(&bytes, &DeclaredFormat::Known(format))
        })
        .await
        .map_err(|e| ExtractError::failed(format, format!("extraction task aborted: {e}")))??;

        info!(
            format = %document.source_format,
            text_chars = document.text.chars().count(),
            storage_key = %storage_key,
            "Upload ingested"
        );

        Ok(IngestedDocument {
            document,
            storage_key,
        })
    }

    fn check_size(&self, file: &UploadedFile) -> Result<(), IngestError> {
        if file.size() == 0 {
            return Err(IngestError::Validation("uploaded file is empty".to_string()));
        }
        if file.size() > self.limits.max_upload_bytes {
            return Err(IngestError::Validation(format!(
                "file is {} bytes; the limit is {} bytes",
                file.size(),
                self.limits.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Settles the declared format (sniffing when undeclared or contradictory) and
    /// checks it against the allow-list.
    fn check_format(&self, file: &UploadedFile) -> Result<FileFormat, IngestError> {
        let declared = FileFormat::resolve_declared(&file.filename, file.content_type.as_deref());
        let format = match declared.resolve(&file.bytes) {
            Ok(format) => format,
            Err(ExtractError::UnsupportedFormat(what)) => {
                warn!(declared = %what, "Rejected unsupported upload");
                return Err(IngestError::UnsupportedFormat(what));
            }
            Err(e) => return Err(e.into()),
        };

        if !self.limits.allowed_formats.contains(&format) {
            return Err(IngestError::Validation(format!(
                "{format} uploads are not accepted; allowed formats: {}",
                self.limits
                    .allowed_formats
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(format)
    }
}
