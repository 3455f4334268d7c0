use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{ErrorKind, Stage, StageFailure};
use crate::ingestion::IngestionService;
use crate::parsing::ParsingService;
use crate::resumes::models::{BaseResume, PipelineOutcome, Provenance, UploadedFile};
use crate::resumes::repository::ResumeRepository;

/// Runs Ingestion, then Parsing, then persistence. The first failing stage ends the
/// run; nothing already stored is rolled back.
pub struct ResumeService {
    ingestion: IngestionService,
    parsing: ParsingService,
    repository: Arc<dyn ResumeRepository>,
}

impl ResumeService {
    pub fn new(
        ingestion: IngestionService,
        parsing: ParsingService,
        repository: Arc<dyn ResumeRepository>,
    ) -> Self {
        Self {
            ingestion,
            parsing,
            repository,
        }
    }

    #[instrument(skip(self, file), fields(filename = %file.filename))]
    pub async fn process(&self, file: UploadedFile) -> PipelineOutcome {
        let ingested = match self.ingestion.ingest(&file).await {
            Ok(ingested) => ingested,
            Err(e) => return fail(Stage::Ingestion, e.kind(), e.to_string()),
        };

        let parsed = match self.parsing.parse(&ingested.document).await {
            Ok(parsed) => parsed,
            Err(e) => return fail(Stage::Parsing, e.kind(), e.to_string()),
        };

        let resume = BaseResume {
            id: Uuid::new_v4(),
            provenance: Provenance {
                size_bytes: file.size(),
                source_format: ingested.document.source_format,
                storage_key: ingested.storage_key,
                uploaded_at: Utc::now(),
                filename: file.filename,
                content_type: file.content_type,
            },
            parsed,
        };

        if let Err(e) = self.repository.save(&resume).await {
            return fail(Stage::Persistence, e.kind(), e.to_string());
        }

        info!(
            resume_id = %resume.id,
            sections = resume.parsed.sections.len(),
            unrecovered = resume.parsed.unrecovered.len(),
            "Resume processed"
        );
        PipelineOutcome::Success(resume)
    }
}

fn fail(stage: Stage, kind: ErrorKind, message: String) -> PipelineOutcome {
    warn!(stage = %stage, kind = %kind, "Pipeline stopped: {message}");
    PipelineOutcome::Failure(StageFailure::new(stage, kind, message))
}
