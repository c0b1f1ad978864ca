//! Generative text integration.
//!
//! One chunk of OCR text in, one block of generated markdown out. The
//! external model is consumed through the [`TextGenerator`] trait; the
//! production implementation is [`GenerationClient`].

mod client;

pub use client::{GenerationClient, GenerateError, TextGenerator, MARKDOWN_INSTRUCTION};
