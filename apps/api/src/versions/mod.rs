//! Job-targeted versions of stored resumes.

pub mod handlers;
pub mod models;
pub mod prompts;
pub mod service;

pub use service::VersionService;
