//! scanscribe - event-driven document digitization pipeline.
//!
//! A source document lands in storage, an ingestion handler runs it
//! through an external OCR service, and a generation handler rewrites
//! the extracted text as clean markdown through an external generative
//! model. All cross-stage state lives in keyed object storage under
//! deterministic keys, so duplicated event deliveries converge instead
//! of duplicating work.

pub mod cli;
pub mod config;
pub mod event;
pub mod generate;
pub mod ocr;
pub mod pipeline;
pub mod retry;
pub mod storage;
