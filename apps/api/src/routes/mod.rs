pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::resumes::handlers;
use crate::versions::handlers as version_handlers;
use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file itself, so an
/// oversized file reaches the ingestion check and gets a precise error.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.upload.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/resumes",
            get(handlers::handle_list).post(handlers::handle_upload),
        )
        .route("/api/v1/resumes/:id", get(handlers::handle_get))
        .route("/api/v1/resumes/:id/file", get(handlers::handle_download))
        .route(
            "/api/v1/resumes/:id/versions",
            post(version_handlers::handle_create_version),
        )
        .route(
            "/api/v1/resumes/versions/:version_id",
            get(version_handlers::handle_get_version),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::{ApiKey, Config, LlmConfig, StorageConfig, UploadLimits};
    use crate::extractors::ExtractorRegistry;
    use crate::ingestion::{FileStorage, IngestionService, LocalFileStorage};
    use crate::llm_client::LlmProvider;
    use crate::parsing::{ParsingConfig, ParsingService};
    use crate::resumes::{InMemoryResumeRepository, ResumeRepository, ResumeService};
    use crate::testing::{StubLlm, StubReply};
    use crate::versions::VersionService;

    const BOUNDARY: &str = "resume-test-boundary";

    struct TestApp {
        router: Router,
        llm: Arc<StubLlm>,
        _dir: TempDir,
    }

    fn app(llm: StubLlm) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let mut llm_config = LlmConfig::for_provider(LlmProvider::Gemini, ApiKey::new("test"));
        llm_config.retry_backoff_ms = 1;
        let config = Config {
            port: 0,
            rust_log: "debug".to_string(),
            database_url: None,
            storage: StorageConfig::Local {
                dir: PathBuf::from(dir.path()),
            },
            upload: UploadLimits::default(),
            llm: llm_config,
        };

        let llm = Arc::new(llm);
        let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(dir.path()));
        let repository: Arc<dyn ResumeRepository> = Arc::new(InMemoryResumeRepository::new());
        let mut parsing_config = ParsingConfig::from(&config.llm);
        parsing_config.retry_backoff = Duration::from_millis(1);

        let versions = VersionService::new(
            llm.clone(),
            repository.clone(),
            config.llm.completion_options(),
        );

        let resumes = ResumeService::new(
            IngestionService::new(
                config.upload.clone(),
                storage.clone(),
                Arc::new(ExtractorRegistry::new()),
            ),
            ParsingService::new(llm.clone(), parsing_config),
            repository.clone(),
        );

        let state = AppState {
            resumes: Arc::new(resumes),
            versions: Arc::new(versions),
            repository,
            storage,
            config: Arc::new(config),
        };

        TestApp {
            router: build_router(state),
            llm,
            _dir: dir,
        }
    }

    fn multipart_request(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/v1/resumes")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(StubLlm::replying("{}"));
        let response = app.router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_executable_upload_is_rejected_with_stable_code() {
        let app = app(StubLlm::replying("{}"));
        let request = multipart_request("file", "setup.exe", "application/x-msdownload", b"MZ\x90\x00");

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "UNSUPPORTED_FILE_FORMAT");
        assert_eq!(body["error"]["stage"], "ingestion");
        assert_eq!(app.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_field_is_validation_error() {
        let app = app(StubLlm::replying("{}"));
        let request = multipart_request("attachment", "cv.txt", "text/plain", b"Jane Doe");

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let app = app(StubLlm::replying("not json at all"));
        let request = multipart_request("file", "cv.txt", "text/plain", b"Jane Doe");

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "PARSING_FAILED");
        assert_eq!(body["error"]["stage"], "parsing");
    }

    #[tokio::test]
    async fn test_upload_then_list_get_and_download() {
        let app = app(StubLlm::replying(
            json!({"skills": ["Rust", "Postgres"]}).to_string(),
        ));
        let upload = multipart_request("file", "jane.txt", "text/plain", b"Skills: Rust, Postgres");

        let response = app.router.clone().oneshot(upload).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["sections"][0]["kind"], "skills");
        assert_eq!(created["source_format"], "txt");
        assert!(created["unrecovered"].as_array().unwrap().contains(&json!("contact")));
        assert!(!created["warnings"].as_array().unwrap().is_empty());
        let id = created["id"].as_str().unwrap().to_string();

        let response = app.router.clone().oneshot(get("/api/v1/resumes")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = json_body(response).await;
        assert_eq!(list["resumes"].as_array().unwrap().len(), 1);
        assert_eq!(list["resumes"][0]["id"], id.as_str());

        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/api/v1/resumes/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = json_body(response).await;
        assert_eq!(detail["provenance"]["filename"], "jane.txt");

        let response = app
            .router
            .oneshot(get(&format!("/api/v1/resumes/{id}/file")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"jane.txt\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Skills: Rust, Postgres");
    }

    #[tokio::test]
    async fn test_unknown_resume_is_not_found() {
        let app = app(StubLlm::replying("{}"));
        let response = app
            .router
            .oneshot(get(&format!("/api/v1/resumes/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_then_create_and_fetch_version() {
        let app = app(StubLlm::new(vec![
            StubReply::Text(json!({"skills": ["Postgres", "Rust"]}).to_string()),
            StubReply::Text(json!({"skills": ["Rust", "Postgres"]}).to_string()),
            StubReply::Text(json!({"cover_letter": "Dear hiring team"}).to_string()),
        ]));
        let upload = multipart_request("file", "jane.txt", "text/plain", b"Skills: Postgres, Rust");
        let response = app.router.clone().oneshot(upload).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let resume_id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/resumes/{resume_id}/versions"),
                &json!({"job_description": "Rust developer"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let version = json_body(response).await;
        assert_eq!(version["resume_id"], resume_id.as_str());
        assert_eq!(version["cover_letter"], "Dear hiring team");
        assert_eq!(version["sections"][0]["content"]["value"], json!(["Rust", "Postgres"]));
        let version_id = version["id"].as_str().unwrap().to_string();

        let response = app
            .router
            .oneshot(get(&format!("/api/v1/resumes/versions/{version_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, version);
        assert_eq!(app.llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_version_for_unknown_resume_is_not_found() {
        let app = app(StubLlm::replying("{}"));
        let response = app
            .router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/resumes/{}/versions", uuid::Uuid::new_v4()),
                &json!({"job_description": "Rust developer"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router
            .oneshot(get(&format!("/api/v1/resumes/versions/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_job_description_is_validation_error() {
        let app = app(StubLlm::replying(json!({"skills": ["Rust"]}).to_string()));
        let upload = multipart_request("file", "jane.txt", "text/plain", b"Skills: Rust");
        let response = app.router.clone().oneshot(upload).await.unwrap();
        let resume_id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .router
            .oneshot(post_json(
                &format!("/api/v1/resumes/{resume_id}/versions"),
                &json!({"job_description": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }
}
