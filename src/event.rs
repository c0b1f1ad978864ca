//! Object-finalized event contract shared by both pipeline handlers.
//!
//! Events arrive from a storage-change notification mechanism with
//! at-least-once delivery. Duplicates and out-of-order arrivals are
//! normal; handlers guard against them with existence checks on their
//! deterministic target keys.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from event payload parsing.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("event has an empty object name")]
    EmptyName,
}

/// A storage "object finalized" notification.
///
/// `generation` is an opaque version token assigned by the storage
/// system. It participates in deterministic key derivation so that a
/// re-uploaded object produces a distinct intermediate result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFinalizedEvent {
    /// Container (bucket) holding the finalized object.
    pub bucket: String,
    /// Object key within the container.
    pub name: String,
    /// Version token, if the storage system provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl ObjectFinalizedEvent {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = Some(generation.into());
        self
    }

    /// Parse an event from a raw JSON payload.
    pub fn from_json(raw: &[u8]) -> Result<Self, EventError> {
        let event: Self = serde_json::from_slice(raw)?;
        if event.name.is_empty() {
            return Err(EventError::EmptyName);
        }
        Ok(event)
    }

    /// The version token, normalized to an empty string when absent.
    /// Hashing the empty token keeps key derivation deterministic either way.
    pub fn generation_token(&self) -> &str {
        self.generation.as_deref().unwrap_or("")
    }

    /// Whether the object name looks like a source document upload.
    pub fn is_pdf(&self) -> bool {
        self.name.to_lowercase().ends_with(".pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let raw = br#"{"bucket": "incoming", "name": "books/a.pdf", "generation": "1712"}"#;
        let event = ObjectFinalizedEvent::from_json(raw).unwrap();
        assert_eq!(event.bucket, "incoming");
        assert_eq!(event.name, "books/a.pdf");
        assert_eq!(event.generation_token(), "1712");
    }

    #[test]
    fn test_from_json_missing_generation() {
        let raw = br#"{"bucket": "incoming", "name": "a.pdf"}"#;
        let event = ObjectFinalizedEvent::from_json(raw).unwrap();
        assert_eq!(event.generation_token(), "");
    }

    #[test]
    fn test_from_json_rejects_missing_fields() {
        assert!(ObjectFinalizedEvent::from_json(br#"{"bucket": "incoming"}"#).is_err());
        assert!(ObjectFinalizedEvent::from_json(br#"{"bucket": "b", "name": ""}"#).is_err());
    }

    #[test]
    fn test_is_pdf() {
        assert!(ObjectFinalizedEvent::new("b", "scan.pdf").is_pdf());
        assert!(ObjectFinalizedEvent::new("b", "SCAN.PDF").is_pdf());
        assert!(!ObjectFinalizedEvent::new("b", "scan.txt").is_pdf());
    }
}
