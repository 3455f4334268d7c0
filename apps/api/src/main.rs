mod config;
mod db;
mod errors;
mod extractors;
mod ingestion;
mod llm_client;
mod parsing;
mod resumes;
mod routes;
mod state;
mod versions;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageConfig};
use crate::db::create_pool;
use crate::extractors::ExtractorRegistry;
use crate::ingestion::{FileStorage, IngestionService, LocalFileStorage, S3FileStorage};
use crate::llm_client::build_llm_client;
use crate::parsing::{ParsingConfig, ParsingService};
use crate::resumes::{InMemoryResumeRepository, PgResumeRepository, ResumeRepository, ResumeService};
use crate::routes::build_router;
use crate::state::AppState;
use crate::versions::VersionService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume API v{}", env!("CARGO_PKG_VERSION"));

    // Raw upload storage
    let storage: Arc<dyn FileStorage> = match &config.storage {
        StorageConfig::Local { dir } => {
            info!("Storing uploads under {}", dir.display());
            Arc::new(LocalFileStorage::new(dir.clone()))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            access_key_id,
            secret_access_key,
        } => {
            let client = build_s3_client(endpoint, access_key_id, secret_access_key.expose()).await;
            info!("S3 client initialized (bucket: {bucket})");
            Arc::new(S3FileStorage::new(client, bucket.clone()))
        }
    };

    // Resume repository
    let repository: Arc<dyn ResumeRepository> = match &config.database_url {
        Some(url) => Arc::new(PgResumeRepository::new(create_pool(url).await?)),
        None => {
            info!("DATABASE_URL not set; resumes are kept in memory");
            Arc::new(InMemoryResumeRepository::new())
        }
    };

    // LLM client
    let llm = build_llm_client(&config.llm)?;
    info!(
        "LLM client initialized (provider: {}, model: {})",
        config.llm.provider, config.llm.model
    );

    let versions = VersionService::new(
        Arc::clone(&llm),
        Arc::clone(&repository),
        config.llm.completion_options(),
    );

    let resumes = ResumeService::new(
        IngestionService::new(
            config.upload.clone(),
            Arc::clone(&storage),
            Arc::new(ExtractorRegistry::new()),
        ),
        ParsingService::new(llm, ParsingConfig::from(&config.llm)),
        Arc::clone(&repository),
    );

    let state = AppState {
        resumes: Arc::new(resumes),
        versions: Arc::new(versions),
        repository,
        storage,
        config: Arc::new(config.clone()),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(
    endpoint: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        "resume-api-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
