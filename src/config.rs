//! Environment-backed runtime configuration.
//!
//! Every knob reads from an environment variable with a sensible default,
//! so a deployment configures the pipeline entirely through its
//! environment (a local `.env` file is honored via dotenvy at startup).

use std::path::PathBuf;
use std::time::Duration;

/// Settings for the object store layout.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root directory backing the local object store.
    pub data_dir: PathBuf,
    /// Container receiving source document uploads.
    pub source_container: String,
    /// Container holding intermediate OCR results.
    pub intermediate_container: String,
    /// Container receiving final markdown artifacts.
    pub output_container: String,
}

/// Settings for the external OCR service.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    /// Service base endpoint.
    pub endpoint: String,
    /// Fully qualified processor resource to submit documents to.
    pub processor: String,
    /// API key, if the deployment authenticates with one.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Delay between polls of a running operation.
    pub poll_interval: Duration,
    /// Maximum polls before the operation is considered stuck.
    pub poll_attempts: u32,
    /// Retry budget for transient submit failures.
    pub max_retries: u32,
}

/// Settings for the external generative-text service.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Service base endpoint.
    pub endpoint: String,
    /// Model identifier.
    pub model: String,
    /// API key, if the deployment authenticates with one.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Response token cap.
    pub max_output_tokens: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry budget for transient failures.
    pub max_retries: u32,
}

/// Settings governing pipeline behavior.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum pages submitted to the model in one chunk.
    pub max_pages_per_chunk: usize,
    /// Maximum concurrent generative-model calls per invocation.
    pub max_concurrent_chunks: usize,
    /// Wall-clock budget for one handler invocation.
    pub invocation_budget: Duration,
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    pub ocr: OcrSettings,
    pub generator: GeneratorSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            storage: StorageSettings {
                data_dir: PathBuf::from(env_string("SCRIBE_DATA_DIR", "./data")),
                source_container: env_string("SCRIBE_SOURCE_BUCKET", "incoming"),
                intermediate_container: env_string("SCRIBE_TEMP_BUCKET", "processed"),
                output_container: env_string("SCRIBE_OUTPUT_BUCKET", "library"),
            },
            ocr: OcrSettings {
                endpoint: env_string("SCRIBE_OCR_ENDPOINT", "https://documentai.googleapis.com"),
                processor: env_string(
                    "SCRIBE_OCR_PROCESSOR",
                    "projects/local/locations/us/processors/default",
                ),
                api_key: env_optional("OCR_API_KEY"),
                request_timeout: Duration::from_secs(env_u64("SCRIBE_OCR_TIMEOUT_SECS", 120)),
                poll_interval: Duration::from_millis(env_u64("SCRIBE_OCR_POLL_MS", 2000)),
                poll_attempts: env_u64("SCRIBE_OCR_POLL_ATTEMPTS", 90) as u32,
                max_retries: env_u64("SCRIBE_OCR_MAX_RETRIES", 5) as u32,
            },
            generator: GeneratorSettings {
                endpoint: env_string(
                    "SCRIBE_GEN_ENDPOINT",
                    "https://generativelanguage.googleapis.com",
                ),
                model: env_string("SCRIBE_MODEL", "gemini-1.5-pro"),
                api_key: env_optional("GEMINI_API_KEY"),
                temperature: 0.1,
                max_output_tokens: env_u64("SCRIBE_GEN_MAX_TOKENS", 8192) as u32,
                request_timeout: Duration::from_secs(env_u64("SCRIBE_GEN_TIMEOUT_SECS", 300)),
                max_retries: env_u64("SCRIBE_GEN_MAX_RETRIES", 5) as u32,
            },
            pipeline: PipelineSettings {
                // A zero or unparsable page count falls back rather than
                // producing degenerate single-page chunks.
                max_pages_per_chunk: env_u64("SCRIBE_CHUNK_PAGES", 10).max(1) as usize,
                max_concurrent_chunks: env_u64("SCRIBE_CHUNK_WORKERS", 4).max(1) as usize,
                invocation_budget: Duration::from_secs(env_u64(
                    "SCRIBE_INVOCATION_BUDGET_SECS",
                    540,
                )),
            },
        }
    }
}

fn env_string(var: &str, default: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
