//! Text extraction stage.
//!
//! Marks the contract as processing, runs the extraction service in
//! synchronous or asynchronous mode depending on the stored file size,
//! assembles line blocks into text and persists the result in one update.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::error::{PlatformError, Result};
use crate::lifecycle::ContractStatus;
use crate::logging::OperationTimer;
use crate::metrics::PipelineMetrics;
use crate::repository::{ContractStore, ContractUpdate};
use crate::services::{BlockType, JobStatus, ObjectRef, ObjectStorage, PipelineServices, TextBlock, TextExtractionService};
use crate::status::StatusTracker;

const STAGE: &str = "text_extraction";

/// Input handed to the stage by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionInput {
    /// Contract to extract
    pub contract_id: Uuid,
    /// Where the uploaded document is stored
    pub object: ObjectRef,
}

/// Stage output, also the input of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Contract the text belongs to
    pub contract_id: Uuid,
    /// LINE blocks joined with newlines, in document order
    pub extracted_text: String,
    /// Distinct page identifiers seen across all result pages
    pub page_count: u32,
    /// Mean LINE block confidence, 0 when nothing was scored
    pub extraction_confidence: f64,
    /// Always `text_extracted`
    pub status: ContractStatus,
}

/// Text, page count and confidence assembled from detected blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    /// Joined line text
    pub text: String,
    /// Distinct pages
    pub page_count: u32,
    /// Mean line confidence
    pub confidence: f64,
}

/// Accumulates blocks across one or more result pages.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    lines: Vec<String>,
    pages: BTreeSet<u32>,
    confidences: Vec<f64>,
}

impl BlockAssembler {
    /// Add one page of results.
    pub fn push(&mut self, blocks: &[TextBlock]) {
        for block in blocks {
            if let Some(page) = block.page {
                self.pages.insert(page);
            }
            if block.block_type != BlockType::Line {
                continue;
            }
            if let Some(text) = &block.text {
                self.lines.push(text.clone());
            }
            if let Some(confidence) = block.confidence {
                self.confidences.push(confidence);
            }
        }
    }

    #[must_use]
    /// Join lines and compute page count and confidence.
    pub fn finish(self) -> ExtractedText {
        let confidence = if self.confidences.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = self.confidences.len() as f64;
            self.confidences.iter().sum::<f64>() / count
        };

        ExtractedText {
            text: self.lines.join("\n"),
            page_count: u32::try_from(self.pages.len()).unwrap_or(u32::MAX),
            confidence,
        }
    }
}

/// The text extraction stage.
pub struct TextExtractionStage {
    store: Arc<dyn ContractStore>,
    storage: Arc<dyn ObjectStorage>,
    extractor: Arc<dyn TextExtractionService>,
    tracker: StatusTracker,
    config: ExtractionConfig,
    metrics: PipelineMetrics,
}

impl TextExtractionStage {
    /// Stage over the shared service handles.
    pub fn new(services: &PipelineServices, config: ExtractionConfig) -> Self {
        Self {
            store: services.store.clone(),
            storage: services.storage.clone(),
            extractor: services.extractor.clone(),
            tracker: StatusTracker::new(services.store.clone()),
            config,
            metrics: PipelineMetrics::default(),
        }
    }

    /// Run the stage for one contract.
    ///
    /// On any failure after the lifecycle guard the record is moved to
    /// `text_extraction_failed` on a best-effort basis and the original
    /// error is returned.
    pub async fn run(&self, input: &ExtractionInput, request_id: &str) -> Result<ExtractionOutcome> {
        let span = info_span!("text_extraction", contract_id = %input.contract_id, request_id);
        self.run_inner(input).instrument(span).await
    }

    async fn run_inner(&self, input: &ExtractionInput) -> Result<ExtractionOutcome> {
        let timer = OperationTimer::new(STAGE);
        info!(key = %input.object.key, "Starting text extraction");

        self.tracker
            .begin(input.contract_id, ContractStatus::ProcessingTextExtraction)
            .await?;

        match self.extract_and_store(input).await {
            Ok(outcome) => {
                self.metrics.record_stage(STAGE, timer.finish(), true);
                info!(
                    page_count = outcome.page_count,
                    confidence = outcome.extraction_confidence,
                    "Text extraction completed successfully"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.metrics.record_stage(STAGE, timer.elapsed(), false);
                error!(error = %err, code = err.code(), "Text extraction failed");
                self.tracker
                    .set_status(input.contract_id, ContractStatus::TextExtractionFailed)
                    .await;
                Err(err)
            }
        }
    }

    async fn extract_and_store(&self, input: &ExtractionInput) -> Result<ExtractionOutcome> {
        let size = self
            .storage
            .object_size(&input.object)
            .await
            .map_err(|err| PlatformError::extraction("Failed to extract text from document", &err))?;

        let extracted = if size > self.config.async_threshold_bytes {
            debug!(size, "Using asynchronous extraction");
            self.extract_async(&input.object).await?
        } else {
            debug!(size, "Using synchronous extraction");
            self.extract_sync(&input.object).await?
        };

        let update = ContractUpdate {
            extracted_text: Some(extracted.text.clone()),
            page_count: Some(extracted.page_count),
            extraction_confidence: Some(extracted.confidence),
            ..ContractUpdate::status(ContractStatus::TextExtracted, Utc::now())
        }
        .when_status(ContractStatus::ProcessingTextExtraction);
        self.store
            .update(input.contract_id, &update)
            .await
            .map_err(|err| PlatformError::Persistence(format!("Failed to update contract metadata: {err:#}")))?;
        self.metrics.record_transition(ContractStatus::TextExtracted);

        Ok(ExtractionOutcome {
            contract_id: input.contract_id,
            extracted_text: extracted.text,
            page_count: extracted.page_count,
            extraction_confidence: extracted.confidence,
            status: ContractStatus::TextExtracted,
        })
    }

    async fn extract_sync(&self, object: &ObjectRef) -> Result<ExtractedText> {
        let blocks = self
            .extractor
            .detect_document_text(object)
            .await
            .map_err(|err| PlatformError::extraction("Synchronous text extraction failed", &err))?;

        let mut assembler = BlockAssembler::default();
        assembler.push(&blocks);
        let extracted = assembler.finish();
        self.metrics.record_extraction(0, extracted.page_count);
        Ok(extracted)
    }

    async fn extract_async(&self, object: &ObjectRef) -> Result<ExtractedText> {
        let job_id = self
            .extractor
            .start_text_detection(object)
            .await
            .map_err(|err| PlatformError::extraction("Asynchronous text extraction failed", &err))?;

        let max_attempts = self.config.max_poll_attempts;
        let mut attempts = 0;
        let first_page = loop {
            if attempts >= max_attempts {
                return Err(PlatformError::ExtractionTimeout { job_id, attempts });
            }
            let page = self
                .extractor
                .get_text_detection(&job_id, None)
                .await
                .map_err(|err| PlatformError::extraction("Asynchronous text extraction failed", &err))?;
            attempts += 1;

            match page.job_status {
                JobStatus::Succeeded => break page,
                JobStatus::Failed => {
                    let reason = page.status_message.unwrap_or_else(|| "no reason given".to_string());
                    return Err(PlatformError::Extraction(format!(
                        "Extraction job {job_id} failed: {reason}"
                    )));
                }
                JobStatus::InProgress => {
                    debug!(%job_id, attempts, "Extraction job still in progress");
                    if attempts < max_attempts {
                        tokio::time::sleep(self.config.poll_interval()).await;
                    }
                }
            }
        };

        let mut assembler = BlockAssembler::default();
        assembler.push(&first_page.blocks);
        let mut next_token = first_page.next_token;
        let mut result_pages = 1_u32;

        while let Some(token) = next_token {
            let page = self
                .extractor
                .get_text_detection(&job_id, Some(&token))
                .await
                .map_err(|err| PlatformError::extraction("Asynchronous text extraction failed", &err))?;
            if page.next_token.as_deref() == Some(token.as_str()) {
                warn!(%job_id, "Extraction service repeated a continuation token");
                return Err(PlatformError::Extraction(format!(
                    "Extraction job {job_id} returned a repeated continuation token"
                )));
            }
            assembler.push(&page.blocks);
            next_token = page.next_token;
            result_pages += 1;
        }

        let extracted = assembler.finish();
        debug!(%job_id, attempts, result_pages, "Collected extraction results");
        self.metrics.record_extraction(attempts, extracted.page_count);
        Ok(extracted)
    }
}
