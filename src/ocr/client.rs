//! Remote OCR service client.
//!
//! Submits a document to the OCR service and polls the resulting
//! long-running operation until it completes, bounded by a poll budget.
//! Transient failures (rate limits, 5xx, transport errors) are retried
//! here with exponential backoff before surfacing to the handler; format
//! rejections are fatal and never retried.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::OcrDocument;
use crate::config::OcrSettings;
use crate::retry::{backoff_delay, delay_from_env, parse_retry_after};

/// Errors from the OCR service.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The service rejected the input format. Never retried.
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("OCR service rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("OCR service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("OCR transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed OCR response: {0}")]
    Malformed(String),

    #[error("OCR operation {operation} still running after {attempts} polls")]
    Incomplete { operation: String, attempts: u32 },
}

impl OcrError {
    /// Fatal errors are acknowledged and reported instead of redelivered.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OcrError::UnsupportedFormat(_))
    }
}

/// Document OCR engine. Implemented by the remote client and by test stubs.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extract structured text from a document.
    ///
    /// `name` is the source object key, used for logging context only.
    async fn process(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrDocument, OcrError>;
}

#[derive(Debug, Serialize)]
struct ProcessRequest {
    #[serde(rename = "rawDocument")]
    raw_document: RawDocument,
}

#[derive(Debug, Serialize)]
struct RawDocument {
    #[serde(rename = "mimeType")]
    mime_type: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    name: Option<String>,
    error: Option<ServiceStatus>,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    #[serde(default)]
    done: bool,
    response: Option<OperationResult>,
    error: Option<ServiceStatus>,
}

#[derive(Debug, Deserialize)]
struct OperationResult {
    document: Option<OcrDocument>,
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

impl ServiceStatus {
    fn into_error(self) -> OcrError {
        // Status code 3 is INVALID_ARGUMENT in the service's error space.
        if self.code == 3 || self.status.as_deref() == Some("INVALID_ARGUMENT") {
            OcrError::UnsupportedFormat(self.message)
        } else {
            OcrError::Service {
                status: 0,
                message: self.message,
            }
        }
    }
}

/// HTTP client for the document OCR service.
pub struct OcrClient {
    settings: OcrSettings,
    client: reqwest::Client,
}

impl OcrClient {
    pub fn new(settings: OcrSettings) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { settings, client })
    }

    fn submit_url(&self) -> String {
        let mut url = format!(
            "{}/v1/{}:process",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.processor
        );
        if let Some(key) = &self.settings.api_key {
            url.push_str("?key=");
            url.push_str(key);
        }
        url
    }

    fn operation_url(&self, operation: &str) -> String {
        let mut url = format!(
            "{}/v1/{}",
            self.settings.endpoint.trim_end_matches('/'),
            operation
        );
        if let Some(key) = &self.settings.api_key {
            url.push_str("?key=");
            url.push_str(key);
        }
        url
    }

    /// Submit the document, retrying transient failures with backoff.
    /// Returns the operation name to poll.
    async fn submit(&self, name: &str, request: &ProcessRequest) -> Result<String, OcrError> {
        let url = self.submit_url();
        let mut attempt = 0;
        loop {
            let response = self.client.post(&url).json(request).send().await;
            let response = match response {
                Ok(r) => r,
                Err(e) if attempt < self.settings.max_retries => {
                    warn!("OCR submit transport error for {} (attempt {}): {}", name, attempt + 1, e);
                    tokio::time::sleep(backoff_delay(attempt, 1000)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(OcrError::Transport(e)),
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let retry_after_secs = retry_after.as_deref().and_then(|s| s.parse::<u64>().ok());

                if attempt >= self.settings.max_retries {
                    if status.as_u16() == 429 {
                        return Err(OcrError::RateLimited { retry_after_secs });
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(OcrError::Service {
                        status: status.as_u16(),
                        message: body,
                    });
                }

                let wait = parse_retry_after(retry_after.as_deref())
                    .unwrap_or_else(|| backoff_delay(attempt, 1000));
                warn!(
                    "OCR service busy for {} ({}, attempt {}), waiting {:?}",
                    name,
                    status,
                    attempt + 1,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            if status.as_u16() == 400 || status.as_u16() == 415 {
                let body = response.text().await.unwrap_or_default();
                return Err(OcrError::UnsupportedFormat(body));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(OcrError::Service {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let submit: SubmitResponse = response
                .json()
                .await
                .map_err(|e| OcrError::Malformed(e.to_string()))?;

            if let Some(error) = submit.error {
                return Err(error.into_error());
            }
            return submit
                .name
                .ok_or_else(|| OcrError::Malformed("submit response missing operation name".into()));
        }
    }

    /// Poll the operation until it completes or the poll budget runs out.
    async fn await_operation(&self, operation: &str) -> Result<OcrDocument, OcrError> {
        for attempt in 0..self.settings.poll_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.settings.poll_interval).await;
            }

            let response = self.client.get(self.operation_url(operation)).send().await?;
            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                // Poll slots double as retry budget for a flaky status endpoint.
                debug!("OCR poll got {} for {}, will retry", status, operation);
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(OcrError::Service {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let op: OperationResponse = response
                .json()
                .await
                .map_err(|e| OcrError::Malformed(e.to_string()))?;

            if !op.done {
                continue;
            }
            if let Some(error) = op.error {
                return Err(error.into_error());
            }
            return op
                .response
                .and_then(|r| r.document)
                .ok_or_else(|| OcrError::Malformed("completed operation carried no document".into()));
        }

        Err(OcrError::Incomplete {
            operation: operation.to_string(),
            attempts: self.settings.poll_attempts,
        })
    }
}

#[async_trait]
impl OcrEngine for OcrClient {
    async fn process(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrDocument, OcrError> {
        let request = ProcessRequest {
            raw_document: RawDocument {
                mime_type: mime_type.to_string(),
                content: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        };

        // Optional inter-request delay to stay under service rate limits.
        let delay = delay_from_env("OCR_DELAY_MS", 0);
        if delay > Duration::ZERO {
            debug!("OCR: waiting {:?} before request", delay);
            tokio::time::sleep(delay).await;
        }

        debug!("OCR submit: {} ({} bytes)", name, bytes.len());
        let operation = self.submit(name, &request).await?;
        debug!("OCR operation started for {}: {}", name, operation);

        let document = self.await_operation(&operation).await?;
        debug!(
            "OCR complete for {}: {} pages, {} chars",
            name,
            document.page_count(),
            document.text.len()
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OcrSettings {
        OcrSettings {
            endpoint: "https://ocr.example.com".to_string(),
            processor: "processors/p1".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            poll_attempts: 3,
            max_retries: 2,
        }
    }

    #[test]
    fn test_submit_url() {
        let client = OcrClient::new(settings()).unwrap();
        assert_eq!(
            client.submit_url(),
            "https://ocr.example.com/v1/processors/p1:process"
        );

        let mut with_key = settings();
        with_key.api_key = Some("k".to_string());
        let client = OcrClient::new(with_key).unwrap();
        assert!(client.submit_url().ends_with(":process?key=k"));
    }

    #[test]
    fn test_invalid_argument_is_fatal() {
        let status = ServiceStatus {
            code: 3,
            message: "not a PDF".to_string(),
            status: Some("INVALID_ARGUMENT".to_string()),
        };
        let err = status.into_error();
        assert!(err.is_fatal());
        assert!(matches!(err, OcrError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_service_errors_are_retryable() {
        let status = ServiceStatus {
            code: 14,
            message: "backend unavailable".to_string(),
            status: Some("UNAVAILABLE".to_string()),
        };
        assert!(!status.into_error().is_fatal());
        assert!(!OcrError::RateLimited {
            retry_after_secs: None
        }
        .is_fatal());
    }
}
