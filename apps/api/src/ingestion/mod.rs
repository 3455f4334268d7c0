pub mod service;
pub mod storage;

pub use service::{IngestError, IngestedDocument, IngestionService};
pub use storage::{FileStorage, LocalFileStorage, S3FileStorage, StorageError};
