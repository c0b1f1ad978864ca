//! Generation handler: OCR-result events in, final markdown artifact out.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::assembler::{assemble, ChunkOutput};
use super::chunker::split_pages;
use super::{Ack, PipelineError};
use crate::config::Settings;
use crate::event::ObjectFinalizedEvent;
use crate::generate::{GenerateError, TextGenerator};
use crate::ocr::OcrDocument;
use crate::storage::{self, ObjectStore, StorageError};

/// Handles object-finalized events for the intermediate container.
///
/// Loads the OCR result, partitions its pages into bounded chunks, drives
/// the generative model over every chunk with bounded parallelism, and
/// writes the assembled artifact at the deterministic output key. A chunk
/// that fails permanently fails the whole event; a partial artifact is
/// never written.
pub struct GenerationHandler {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn TextGenerator>,
    intermediate_container: String,
    output_container: String,
    max_pages_per_chunk: usize,
    max_concurrent_chunks: usize,
    invocation_budget: std::time::Duration,
}

impl GenerationHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        generator: Arc<dyn TextGenerator>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            generator,
            intermediate_container: settings.storage.intermediate_container.clone(),
            output_container: settings.storage.output_container.clone(),
            max_pages_per_chunk: settings.pipeline.max_pages_per_chunk,
            max_concurrent_chunks: settings.pipeline.max_concurrent_chunks,
            invocation_budget: settings.pipeline.invocation_budget,
        }
    }

    pub async fn handle(&self, event: &ObjectFinalizedEvent) -> Result<Ack, PipelineError> {
        if event.bucket != self.intermediate_container {
            info!(
                "ignoring event for container {} (expected {})",
                event.bucket, self.intermediate_container
            );
            return Ok(Ack::Skipped);
        }
        if !storage::is_intermediate_key(&event.name) {
            info!("skipping non-OCR-result object: {}", event.name);
            return Ok(Ack::Skipped);
        }

        let output_key = storage::output_key(&event.name);

        // Idempotence guard. A prior delivery already produced the artifact.
        if self.store.exists(&self.output_container, &output_key).await? {
            info!(
                "duplicate delivery for {}: {} already exists",
                event.name, output_key
            );
            return Ok(Ack::Duplicate);
        }

        let raw = match self.store.get(&event.bucket, &event.name).await {
            Ok(raw) => raw,
            Err(StorageError::NotFound { .. }) => {
                warn!("intermediate object {} vanished, dropping event", event.name);
                return Ok(Ack::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        let document = match OcrDocument::from_json(&raw) {
            Ok(document) => document,
            Err(e) => {
                // The object is durable, so redelivery would parse the
                // same bytes again. Report and drop.
                error!("intermediate object {} is not valid JSON: {}", event.name, e);
                return Ok(Ack::Rejected);
            }
        };

        let chunks = split_pages(document.page_count(), self.max_pages_per_chunk);
        if chunks.is_empty() {
            warn!("{} holds no pages, writing empty artifact", event.name);
            self.store
                .put(&self.output_container, &output_key, b"")
                .await?;
            return Ok(Ack::Completed);
        }

        info!(
            "generating {} chunks for {} ({} pages, {} per chunk)",
            chunks.len(),
            event.name,
            document.page_count(),
            self.max_pages_per_chunk
        );

        let outputs = match tokio::time::timeout(
            self.invocation_budget,
            self.run_chunks(&event.name, &document, &chunks),
        )
        .await
        {
            // Dropping the JoinSet inside run_chunks aborts in-flight
            // chunk calls when the budget expires.
            Err(_) => {
                return Err(PipelineError::BudgetExceeded {
                    budget: self.invocation_budget,
                    phase: "generating chunks",
                })
            }
            Ok(result) => result?,
        };

        let artifact = assemble(outputs);
        self.store
            .put(&self.output_container, &output_key, artifact.as_bytes())
            .await?;

        info!(
            "artifact for {} written to {}/{} ({} chars)",
            event.name,
            self.output_container,
            output_key,
            artifact.len()
        );
        Ok(Ack::Completed)
    }

    /// Fan the chunks out over the generator with bounded parallelism and
    /// gather every result keyed by chunk index. Completion order is
    /// irrelevant; the assembler re-sorts.
    async fn run_chunks(
        &self,
        name: &str,
        document: &OcrDocument,
        chunks: &[super::chunker::PageChunk],
    ) -> Result<Vec<ChunkOutput>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_chunks.max(1)));
        let mut workers: JoinSet<(usize, Result<String, GenerateError>)> = JoinSet::new();

        for chunk in chunks {
            let text = document.page_range_text(chunk.start, chunk.end);
            let index = chunk.index;
            let generator = self.generator.clone();
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                if text.trim().is_empty() {
                    // Nothing to transform; keep the index so assembly
                    // still sees a complete partition.
                    return (index, Ok(String::new()));
                }
                (index, generator.generate(&text).await)
            });
        }

        let mut outputs = Vec::with_capacity(chunks.len());
        while let Some(joined) = workers.join_next().await {
            let (index, result) = joined?;
            match result {
                Ok(markdown) => outputs.push(ChunkOutput { index, markdown }),
                // First failure wins; dropping the JoinSet aborts the rest.
                Err(err) => {
                    return Err(PipelineError::Generation {
                        name: name.to_string(),
                        chunk: index,
                        err,
                    })
                }
            }
        }
        Ok(outputs)
    }
}
