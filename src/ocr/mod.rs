//! OCR integration.
//!
//! The external OCR service is consumed through the narrow [`OcrEngine`]
//! trait so handlers can be exercised against stubs. [`OcrClient`] is the
//! production implementation: submit a document, poll the long-running
//! operation, return the structured per-page result.

mod client;
mod types;

pub use client::{OcrClient, OcrEngine, OcrError};
pub use types::{OcrDocument, OcrPage, PageLayout, TextAnchor, TextSegment};
