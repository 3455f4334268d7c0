use std::sync::Arc;

use crate::config::Config;
use crate::ingestion::FileStorage;
use crate::resumes::{ResumeRepository, ResumeService};
use crate::versions::VersionService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub resumes: Arc<ResumeService>,
    pub versions: Arc<VersionService>,
    pub repository: Arc<dyn ResumeRepository>,
    /// Same storage the ingestion service writes to; used for downloads.
    pub storage: Arc<dyn FileStorage>,
    pub config: Arc<Config>,
}
