//! Client for the external generative-text model.
//!
//! Each call submits one chunk of OCR text together with the fixed
//! transformation instruction and returns the generated markdown for that
//! chunk. Transient failures are retried with backoff up to a bounded
//! attempt count; content-policy rejections are fatal and surface
//! unchanged; a malformed response is retried once, then treated as fatal.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeneratorSettings;
use crate::retry::{backoff_delay, delay_from_env};

/// Transformation instruction for converting OCR text to markdown.
///
/// Fixed at compile time for reproducibility; never accepted from
/// external input.
pub const MARKDOWN_INSTRUCTION: &str = r#"You are an expert editor converting OCR text from scanned documents into clean, faithful Markdown.

GOAL
- Reconstruct the original content as accurately as possible.
- Improve readability with Markdown structure without changing meaning.

STRICT RULES
- Do NOT summarize.
- Do NOT invent missing content.
- Preserve the original language of the source text.
- Fix OCR errors only when the correction is obvious and certain.
- If uncertain, keep the original text as-is.

CLEANUP
- Remove repeated noise such as page numbers, running headers, footers, and watermarks.
- If the same line repeats across pages, keep it only once.

STRUCTURE
- Use headings (#, ##, ###) only when the section structure is clear from the text.
- Preserve paragraph breaks; do not merge unrelated paragraphs.
- Preserve lists (bullets/numbering) and indentation.
- Detect code, CLI commands, config files, and logs; wrap them in fenced code blocks.
- For tables, use Markdown tables if clearly tabular; otherwise keep as preformatted text.

OUTPUT
- Output valid Markdown only.
- No additional explanations outside the Markdown.
- Do not translate unless the source text itself is translated."#;

/// Errors from the generative model.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The model refused the content. Never retried.
    #[error("content rejected by generation service: {0}")]
    ContentPolicy(String),

    /// The response stayed malformed after the single retry allowed for it.
    #[error("unusable generation response: {0}")]
    Unusable(String),

    #[error("generation service rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("generation service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("generation transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed generation response: {0}")]
    Malformed(String),
}

impl GenerateError {
    /// Fatal errors must not be retried by the caller either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GenerateError::ContentPolicy(_) | GenerateError::Unusable(_)
        )
    }
}

/// Chunk-level text generation. Implemented by the remote client and by
/// test stubs.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate markdown for one chunk of OCR text.
    async fn generate(&self, chunk_text: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// HTTP client for the generative-text service.
pub struct GenerationClient {
    settings: GeneratorSettings,
    client: reqwest::Client,
}

impl GenerationClient {
    pub fn new(settings: GeneratorSettings) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { settings, client })
    }

    fn generate_url(&self) -> String {
        let mut url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        if let Some(key) = &self.settings.api_key {
            url.push_str("?key=");
            url.push_str(key);
        }
        url
    }

    fn build_request(&self, chunk_text: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: MARKDOWN_INSTRUCTION.to_string(),
                    },
                    Part {
                        text: "\n\n--- OCR TEXT ---\n".to_string(),
                    },
                    Part {
                        text: chunk_text.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            },
        }
    }

    /// Extract the generated text, or the reason the response is unusable.
    fn extract_text(response: GenerateResponse) -> Result<String, GenerateError> {
        if let Some(error) = response.error {
            return Err(GenerateError::Service {
                status: 0,
                message: error.message,
            });
        }
        if let Some(feedback) = response.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(GenerateError::ContentPolicy(reason));
            }
        }

        let candidate = response
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| GenerateError::Malformed("response carried no candidates".into()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(GenerateError::ContentPolicy("finish_reason=SAFETY".into()));
        }

        let text: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerateError::Malformed("candidate carried no text".into()));
        }
        Ok(text)
    }

    async fn call_once(&self, request: &GenerateRequest) -> Result<String, GenerateError> {
        let response = self
            .client
            .post(self.generate_url())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(GenerateError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Service {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Malformed(e.to_string()))?;
        Self::extract_text(parsed)
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn generate(&self, chunk_text: &str) -> Result<String, GenerateError> {
        let request = self.build_request(chunk_text);

        let delay = delay_from_env("GENERATE_DELAY_MS", 0);
        if delay > Duration::ZERO {
            debug!("generation: waiting {:?} before request", delay);
            tokio::time::sleep(delay).await;
        }

        let mut attempt = 0;
        let mut malformed_retried = false;
        loop {
            debug!(
                "generation request: {} input chars (attempt {})",
                chunk_text.len(),
                attempt + 1
            );
            match self.call_once(&request).await {
                Ok(text) => {
                    debug!("generation response: {} output chars", text.len());
                    return Ok(text);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(GenerateError::Malformed(msg)) => {
                    // One retry covers a garbled response; a second one
                    // means the contract is actually broken.
                    if malformed_retried {
                        return Err(GenerateError::Unusable(msg));
                    }
                    warn!("generation response malformed, retrying once: {}", msg);
                    malformed_retried = true;
                }
                Err(e) => {
                    if attempt >= self.settings.max_retries {
                        return Err(e);
                    }
                    let wait = match &e {
                        GenerateError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs((*secs).min(60)),
                        _ => backoff_delay(attempt, 1000),
                    };
                    warn!(
                        "generation attempt {} failed ({}), waiting {:?}",
                        attempt + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> GenerateResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_extract_text() {
        let resp = response(
            r##"{"candidates": [{"content": {"parts": [{"text": "# Title"}, {"text": "\nbody"}]}}]}"##,
        );
        assert_eq!(GenerationClient::extract_text(resp).unwrap(), "# Title\nbody");
    }

    #[test]
    fn test_extract_text_blocked_prompt_is_fatal() {
        let resp = response(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#);
        let err = GenerationClient::extract_text(resp).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_extract_text_safety_finish_is_fatal() {
        let resp = response(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#);
        let err = GenerationClient::extract_text(resp).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_extract_text_empty_is_malformed() {
        let resp = response(r#"{"candidates": [{"content": {"parts": []}}]}"#);
        let err = GenerationClient::extract_text(resp).unwrap_err();
        assert!(matches!(err, GenerateError::Malformed(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_instruction_is_markdown_only() {
        assert!(MARKDOWN_INSTRUCTION.contains("Do NOT summarize"));
        assert!(MARKDOWN_INSTRUCTION.contains("valid Markdown only"));
    }
}
