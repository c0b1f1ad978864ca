//! The two-stage transformation pipeline.
//!
//! Stage one reacts to source uploads and persists structured OCR output;
//! stage two reacts to that output and produces the final markdown
//! artifact. The stages share no in-process state. Every invocation is a
//! function of (event, durable storage contents), which is what makes
//! at-least-once event delivery safe.
//!
//! A handler returning `Ok(ack)` acknowledges the event. A handler
//! returning `Err` fails the event so the event source redelivers it;
//! every `Err` is therefore a retryable condition by construction. Fatal
//! conditions are acknowledged as [`Ack::Rejected`] and reported through
//! the error log instead.

pub mod assembler;
pub mod chunker;
mod generate;
mod ingest;

use std::time::Duration;

use thiserror::Error;

pub use assembler::{assemble, ChunkOutput};
pub use chunker::{split_pages, PageChunk};
pub use generate::GenerationHandler;
pub use ingest::IngestionHandler;

use crate::generate::GenerateError;
use crate::ocr::OcrError;
use crate::storage::StorageError;

/// Acknowledged outcomes of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Work was performed and the target artifact written.
    Completed,
    /// The event did not match this handler's naming convention.
    Skipped,
    /// The target artifact already exists; duplicate delivery.
    Duplicate,
    /// Fatal content error. Acknowledged and reported; no artifact.
    Rejected,
}

/// Retryable pipeline failures. Returning one of these fails the event
/// for redelivery, so each carries enough identity to be actionable in
/// logs across attempts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("OCR failed for {name}: {err}")]
    Ocr {
        name: String,
        #[source]
        err: OcrError,
    },

    #[error("generation failed for {name} at chunk {chunk}: {err}")]
    Generation {
        name: String,
        chunk: usize,
        #[source]
        err: GenerateError,
    },

    #[error("invocation budget of {budget:?} exceeded while {phase}")]
    BudgetExceeded {
        budget: Duration,
        phase: &'static str,
    },

    #[error("chunk worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
