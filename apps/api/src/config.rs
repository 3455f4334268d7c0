use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::extractors::FileFormat;
use crate::llm_client::{CompletionOptions, LlmProvider};
use crate::parsing::prompts::min_input_tokens;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Postgres is used when set; otherwise resumes live in memory.
    pub database_url: Option<String>,
    pub storage: StorageConfig,
    pub upload: UploadLimits,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        dir: PathBuf,
    },
    S3 {
        bucket: String,
        endpoint: String,
        access_key_id: String,
        secret_access_key: ApiKey,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_upload_bytes: usize,
    pub allowed_formats: Vec<FileFormat>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_formats: FileFormat::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: ApiKey,
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub max_input_tokens: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub retry_backoff_ms: u64,
}

impl LlmConfig {
    /// Config with the provider's default model and conservative limits.
    pub fn for_provider(provider: LlmProvider, api_key: ApiKey) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key,
            base_url: None,
            timeout_ms: 60_000,
            max_retries: 2,
            max_input_tokens: 30_000,
            max_output_tokens: 8_192,
            temperature: 0.1,
            retry_backoff_ms: 500,
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Secret that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: optional_env("DATABASE_URL"),
            storage: storage_from_env()?,
            upload: UploadLimits {
                max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
                allowed_formats: match optional_env("ALLOWED_FORMATS") {
                    Some(raw) => parse_format_list(&raw)?,
                    None => FileFormat::ALL.to_vec(),
                },
            },
            llm: llm_from_env()?,
        })
    }
}

fn storage_from_env() -> Result<StorageConfig> {
    let backend = optional_env("STORAGE_BACKEND").unwrap_or_else(|| "local".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "local" => Ok(StorageConfig::Local {
            dir: optional_env("RESUME_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("storage/resumes")),
        }),
        "s3" => Ok(StorageConfig::S3 {
            bucket: require_env("S3_BUCKET")?,
            endpoint: require_env("S3_ENDPOINT")?,
            access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: ApiKey::new(require_env("AWS_SECRET_ACCESS_KEY")?),
        }),
        other => Err(anyhow!(
            "STORAGE_BACKEND must be 'local' or 's3', got '{other}'"
        )),
    }
}

fn llm_from_env() -> Result<LlmConfig> {
    let provider: LlmProvider = optional_env("LLM_PROVIDER")
        .unwrap_or_else(|| "gemini".to_string())
        .parse()
        .map_err(|e: String| anyhow!(e))
        .context("LLM_PROVIDER is invalid")?;

    let defaults = LlmConfig::for_provider(provider, ApiKey::new(String::new()));
    let temperature: f32 = parse_env("LLM_TEMPERATURE", defaults.temperature)?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(anyhow!("LLM_TEMPERATURE must be between 0.0 and 2.0"));
    }

    let max_input_tokens =
        check_input_budget(parse_env("LLM_MAX_INPUT_TOKENS", defaults.max_input_tokens)?)?;

    Ok(LlmConfig {
        provider,
        model: optional_env("LLM_MODEL").unwrap_or(defaults.model),
        api_key: ApiKey::new(require_env(provider.api_key_var())?),
        base_url: optional_env("LLM_BASE_URL"),
        timeout_ms: parse_env("LLM_TIMEOUT_MS", defaults.timeout_ms)?,
        max_retries: parse_env("LLM_MAX_RETRIES", defaults.max_retries)?,
        max_input_tokens,
        max_output_tokens: parse_env("LLM_MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
        temperature,
        retry_backoff_ms: parse_env("LLM_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
    })
}

fn check_input_budget(max_input_tokens: usize) -> Result<usize> {
    let min = min_input_tokens();
    if max_input_tokens < min {
        return Err(anyhow!(
            "LLM_MAX_INPUT_TOKENS must be at least {min} to fit the parse instructions and resume text, got {max_input_tokens}"
        ));
    }
    Ok(max_input_tokens)
}

/// Parses a comma-separated list such as `pdf,docx`.
fn parse_format_list(raw: &str) -> Result<Vec<FileFormat>> {
    let mut formats = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let format = FileFormat::from_str(item)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("ALLOWED_FORMATS contains unknown format '{item}'"))?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        return Err(anyhow!("ALLOWED_FORMATS must name at least one format"));
    }
    Ok(formats)
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("{key} has invalid value '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.expose(), "sk-very-secret");

        let config = LlmConfig::for_provider(LlmProvider::OpenAi, key);
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }

    #[test]
    fn test_parse_format_list() {
        assert_eq!(
            parse_format_list("pdf, .DOCX,pdf").unwrap(),
            vec![FileFormat::Pdf, FileFormat::Docx]
        );
        assert!(parse_format_list("pdf,exe").is_err());
        assert!(parse_format_list(" , ").is_err());
    }

    #[test]
    fn test_input_budget_must_fit_the_prompt() {
        assert!(check_input_budget(200).is_err());
        let min = min_input_tokens();
        assert_eq!(check_input_budget(min).unwrap(), min);
        assert!(check_input_budget(30_000).is_ok());
    }

    #[test]
    fn test_parse_value_reports_key() {
        let port: u16 = parse_value("PORT", " 9000 ").unwrap();
        assert_eq!(port, 9000);

        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_completion_options_follow_config() {
        let mut config = LlmConfig::for_provider(LlmProvider::Gemini, ApiKey::new("k"));
        config.timeout_ms = 1234;
        let options = config.completion_options();
        assert_eq!(options.model, "gemini-2.5-flash");
        assert_eq!(options.timeout_ms, 1234);
        assert_eq!(options.max_output_tokens, config.max_output_tokens);
    }
}
