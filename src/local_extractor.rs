//! Plain-text extraction service.
//!
//! Treats the stored object as text: form feeds separate pages and every
//! non-blank line becomes a LINE block. Asynchronous jobs run in memory,
//! report `IN_PROGRESS` for a configurable number of status checks and then
//! serve their blocks in fixed-size result pages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::services::{DetectionPage, JobStatus, ObjectRef, ObjectStorage, TextBlock, TextExtractionService};
use crate::validation::InputValidator;

const PAGE_BREAK: char = '\u{000C}';
const CLEAN_LINE_CONFIDENCE: f64 = 99.0;
const LOSSY_LINE_CONFIDENCE: f64 = 60.0;

struct Job {
    blocks: Vec<TextBlock>,
    pending_checks: u32,
}

/// Extraction service over plain-text objects.
pub struct LocalTextExtractor {
    storage: Arc<dyn ObjectStorage>,
    jobs: Mutex<HashMap<String, Job>>,
    pending_checks: u32,
    page_size: usize,
}

impl LocalTextExtractor {
    /// Extractor reading objects from `storage` and serving `page_size`
    /// blocks per result page.
    pub fn new(storage: Arc<dyn ObjectStorage>, page_size: usize) -> Self {
        Self {
            storage,
            jobs: Mutex::new(HashMap::new()),
            pending_checks: 0,
            page_size: page_size.max(1),
        }
    }

    /// Number of status checks a new job answers with `IN_PROGRESS`.
    #[must_use]
    pub const fn with_pending_checks(mut self, checks: u32) -> Self {
        self.pending_checks = checks;
        self
    }

    /// Jobs whose results have not been fully served yet.
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().map_or(0, |jobs| jobs.len())
    }

    async fn blocks_for(&self, object: &ObjectRef) -> Result<Vec<TextBlock>> {
        let bytes = self.storage.read_object(object).await?;
        Ok(text_blocks(&bytes))
    }
}

/// Split raw document bytes into page and line blocks.
#[must_use]
pub fn text_blocks(bytes: &[u8]) -> Vec<TextBlock> {
    let text = String::from_utf8_lossy(bytes);
    let mut blocks = Vec::new();

    for (index, page_text) in text.split(PAGE_BREAK).enumerate() {
        let page = u32::try_from(index + 1).unwrap_or(u32::MAX);
        blocks.push(TextBlock::page(page));

        for raw_line in page_text.lines() {
            let line: String = InputValidator::sanitize_text(raw_line).nfc().collect();
            if line.is_empty() {
                continue;
            }
            let confidence = if line.contains(char::REPLACEMENT_CHARACTER) {
                LOSSY_LINE_CONFIDENCE
            } else {
                CLEAN_LINE_CONFIDENCE
            };
            blocks.push(TextBlock::line(&line, page, confidence));
        }
    }

    blocks
}

#[async_trait]
impl TextExtractionService for LocalTextExtractor {
    async fn detect_document_text(&self, object: &ObjectRef) -> Result<Vec<TextBlock>> {
        self.blocks_for(object).await
    }

    async fn start_text_detection(&self, object: &ObjectRef) -> Result<String> {
        let blocks = self.blocks_for(object).await?;
        let job_id = Uuid::new_v4().to_string();
        debug!(%job_id, blocks = blocks.len(), "Started extraction job");

        self.jobs
            .lock()
            .map_err(|_| anyhow!("Extraction job table is poisoned"))?
            .insert(
                job_id.clone(),
                Job {
                    blocks,
                    pending_checks: self.pending_checks,
                },
            );
        Ok(job_id)
    }

    async fn get_text_detection(&self, job_id: &str, next_token: Option<&str>) -> Result<DetectionPage> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("Extraction job table is poisoned"))?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| anyhow!("Unknown extraction job {job_id}"))?;

        if job.pending_checks > 0 {
            job.pending_checks -= 1;
            return Ok(DetectionPage {
                job_status: JobStatus::InProgress,
                blocks: Vec::new(),
                next_token: None,
                status_message: None,
            });
        }

        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .with_context(|| format!("Invalid continuation token {token}"))?,
            None => 0,
        };
        let total = job.blocks.len();
        let end = start.saturating_add(self.page_size).min(total);
        let blocks = job.blocks.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < total).then(|| end.to_string());

        // Last page served.
        if next_token.is_none() {
            jobs.remove(job_id);
            debug!(%job_id, "Finished extraction job");
        }

        Ok(DetectionPage {
            job_status: JobStatus::Succeeded,
            blocks,
            next_token,
            status_message: None,
        })
    }
}
