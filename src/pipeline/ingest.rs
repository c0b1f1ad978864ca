//! Ingestion handler: source upload events in, OCR results out.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{Ack, PipelineError};
use crate::config::Settings;
use crate::event::ObjectFinalizedEvent;
use crate::ocr::{OcrEngine, OcrError};
use crate::storage::{self, ObjectStore, StorageError};

/// Handles object-finalized events for the source container.
///
/// Validates the event, runs OCR through the engine, and persists the
/// structured result at the deterministic intermediate key. The existence
/// check on that key makes duplicate deliveries converge without
/// re-invoking the OCR service.
pub struct IngestionHandler {
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn OcrEngine>,
    source_container: String,
    intermediate_container: String,
    invocation_budget: std::time::Duration,
}

impl IngestionHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn OcrEngine>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            engine,
            source_container: settings.storage.source_container.clone(),
            intermediate_container: settings.storage.intermediate_container.clone(),
            invocation_budget: settings.pipeline.invocation_budget,
        }
    }

    pub async fn handle(&self, event: &ObjectFinalizedEvent) -> Result<Ack, PipelineError> {
        if event.bucket != self.source_container {
            info!(
                "ignoring event for container {} (expected {})",
                event.bucket, self.source_container
            );
            return Ok(Ack::Skipped);
        }
        if !event.is_pdf() {
            info!("skipping non-PDF upload: {}", event.name);
            return Ok(Ack::Skipped);
        }

        let target_key =
            storage::intermediate_key(&event.bucket, &event.name, event.generation_token());

        // Idempotence guard. A prior delivery already produced this result.
        if self
            .store
            .exists(&self.intermediate_container, &target_key)
            .await?
        {
            info!(
                "duplicate delivery for {}: {} already exists",
                event.name, target_key
            );
            return Ok(Ack::Duplicate);
        }

        let bytes = match self.store.get(&event.bucket, &event.name).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { .. }) => {
                // The object was removed between the event and this
                // invocation. Redelivery cannot bring it back.
                warn!("source object {} vanished, dropping event", event.name);
                return Ok(Ack::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        // The name says .pdf; make sure the bytes agree before paying for
        // an OCR call that the service would reject anyway.
        let mime_type = infer::get(&bytes).map(|t| t.mime_type()).unwrap_or("");
        if mime_type != "application/pdf" {
            error!(
                "rejecting {}: content is {} rather than a PDF",
                event.name,
                if mime_type.is_empty() { "unrecognized" } else { mime_type }
            );
            return Ok(Ack::Rejected);
        }

        info!("starting OCR for {}/{}", event.bucket, event.name);
        let ocr = tokio::time::timeout(
            self.invocation_budget,
            self.engine.process(&event.name, &bytes, mime_type),
        )
        .await;

        let document = match ocr {
            Err(_) => {
                return Err(PipelineError::BudgetExceeded {
                    budget: self.invocation_budget,
                    phase: "awaiting OCR",
                })
            }
            Ok(Err(e)) if e.is_fatal() => {
                error!("OCR rejected {}: {}", event.name, e);
                return Ok(Ack::Rejected);
            }
            Ok(Err(e)) => {
                return Err(PipelineError::Ocr {
                    name: event.name.clone(),
                    err: e,
                })
            }
            Ok(Ok(document)) => document,
        };

        let payload = document.to_json().map_err(|e| PipelineError::Ocr {
            name: event.name.clone(),
            err: OcrError::Malformed(e.to_string()),
        })?;

        self.store
            .put(&self.intermediate_container, &target_key, &payload)
            .await?;

        info!(
            "OCR result for {} written to {}/{} ({} pages)",
            event.name,
            self.intermediate_container,
            target_key,
            document.page_count()
        );
        Ok(Ack::Completed)
    }
}
