//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use contract_pipeline::models::{SentimentAnalysis, SentimentScores};
use contract_pipeline::repository::{ContractUpdate, OwnerPage, OwnerQuery};
use contract_pipeline::services::{
    AnalysisService, DetectedEntity, DetectionPage, JobStatus, LanguageService, ObjectRef, ObjectStorage,
    PipelineServices, TextBlock, TextExtractionService, UploadCredential,
};
use contract_pipeline::{ContractRecord, ContractStatus, ContractStore, MemoryContractStore};

pub const OWNER: &str = "user-1";

/// Insert a record owned by `user_id` in `status`.
pub async fn seed(store: &dyn ContractStore, user_id: &str, status: ContractStatus) -> ContractRecord {
    seed_at(store, user_id, status, Utc::now()).await
}

pub async fn seed_at(
    store: &dyn ContractStore,
    user_id: &str,
    status: ContractStatus,
    created_at: DateTime<Utc>,
) -> ContractRecord {
    let contract_id = Uuid::new_v4();
    let mut record = ContractRecord::new(
        contract_id,
        user_id,
        "nda.pdf",
        2048,
        "application/pdf",
        format!("contracts/{user_id}/{contract_id}/nda.pdf"),
        created_at,
    );
    record.status = status;
    store.create(&record).await.expect("seed record");
    record
}

pub fn object(record: &ContractRecord) -> ObjectRef {
    ObjectRef::new("contracts", record.storage_key.clone())
}

/// Object storage reporting a fixed size for every object.
#[derive(Default)]
pub struct FixedStorage {
    pub size: u64,
    pub fail_credentials: bool,
}

impl FixedStorage {
    pub fn sized(size: u64) -> Self {
        Self {
            size,
            fail_credentials: false,
        }
    }
}

#[async_trait]
impl ObjectStorage for FixedStorage {
    async fn object_size(&self, _object: &ObjectRef) -> Result<u64> {
        Ok(self.size)
    }

    async fn read_object(&self, _object: &ObjectRef) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn issue_upload_credential(
        &self,
        object: &ObjectRef,
        _content_type: &str,
        expires_in: Duration,
    ) -> Result<UploadCredential> {
        if self.fail_credentials {
            return Err(anyhow!("credential service unavailable"));
        }
        Ok(UploadCredential {
            url: format!("memory://{}/{}?token=t", object.bucket, object.key),
            expires_at: Utc::now() + chrono::Duration::from_std(expires_in)?,
        })
    }
}

/// Extraction service replaying scripted responses.
#[derive(Default)]
pub struct ScriptedExtractor {
    pub sync_blocks: Vec<TextBlock>,
    /// Answers to status checks (calls without a token), in order
    pub status_checks: Mutex<VecDeque<DetectionPage>>,
    /// Result pages keyed by continuation token
    pub pages: HashMap<String, DetectionPage>,
    pub fail_sync: bool,
    pub sync_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn sync(blocks: Vec<TextBlock>) -> Self {
        Self {
            sync_blocks: blocks,
            ..Self::default()
        }
    }

    pub fn asynchronous(checks: Vec<DetectionPage>, pages: Vec<(&str, DetectionPage)>) -> Self {
        Self {
            status_checks: Mutex::new(checks.into()),
            pages: pages
                .into_iter()
                .map(|(token, page)| (token.to_string(), page))
                .collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.sync_calls.load(Ordering::SeqCst),
            self.start_calls.load(Ordering::SeqCst),
            self.get_calls.load(Ordering::SeqCst),
        )
    }
}

pub fn in_progress() -> DetectionPage {
    DetectionPage {
        job_status: JobStatus::InProgress,
        blocks: Vec::new(),
        next_token: None,
        status_message: None,
    }
}

pub fn succeeded(blocks: Vec<TextBlock>, next_token: Option<&str>) -> DetectionPage {
    DetectionPage {
        job_status: JobStatus::Succeeded,
        blocks,
        next_token: next_token.map(str::to_string),
        status_message: None,
    }
}

#[async_trait]
impl TextExtractionService for ScriptedExtractor {
    async fn detect_document_text(&self, _object: &ObjectRef) -> Result<Vec<TextBlock>> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync {
            return Err(anyhow!("unsupported document format"));
        }
        Ok(self.sync_blocks.clone())
    }

    async fn start_text_detection(&self, _object: &ObjectRef) -> Result<String> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok("job-1".to_string())
    }

    async fn get_text_detection(&self, _job_id: &str, next_token: Option<&str>) -> Result<DetectionPage> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        match next_token {
            None => self
                .status_checks
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted status check left")),
            Some(token) => self
                .pages
                .get(token)
                .cloned()
                .ok_or_else(|| anyhow!("unknown token {token}")),
        }
    }
}

/// Language model double returning a canned reply.
pub struct ScriptedAnalyzer {
    reply: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedAnalyzer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalyzer {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(prompt.to_string());
        self.reply.clone().ok_or_else(|| anyhow!("model endpoint unavailable"))
    }
}

/// Language service double with fixed answers.
pub struct FixedLanguage {
    pub sentiment: Option<SentimentAnalysis>,
    pub entities: Option<Vec<DetectedEntity>>,
}

impl FixedLanguage {
    pub fn negative(negative: f64) -> Self {
        Self {
            sentiment: Some(SentimentAnalysis {
                sentiment: "NEGATIVE".to_string(),
                sentiment_scores: SentimentScores {
                    positive: 0.0,
                    negative,
                    neutral: 1.0 - negative,
                    mixed: 0.0,
                },
            }),
            entities: Some(Vec::new()),
        }
    }

    pub fn with_entities(mut self, entities: Vec<DetectedEntity>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn failing() -> Self {
        Self {
            sentiment: None,
            entities: None,
        }
    }
}

#[async_trait]
impl LanguageService for FixedLanguage {
    async fn detect_sentiment(&self, _text: &str, _language_code: &str) -> Result<SentimentAnalysis> {
        self.sentiment
            .clone()
            .ok_or_else(|| anyhow!("sentiment service throttled"))
    }

    async fn detect_entities(&self, _text: &str, _language_code: &str) -> Result<Vec<DetectedEntity>> {
        self.entities
            .clone()
            .ok_or_else(|| anyhow!("entity service throttled"))
    }
}

/// Store that can be told to fail selected operations.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryContractStore,
    pub fail_get: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_query: AtomicBool,
    /// Fail only updates that write more than the status
    pub fail_result_updates: AtomicBool,
    /// Fail every update
    pub fail_all_updates: AtomicBool,
    /// Fail the next update only
    pub fail_next_update: AtomicBool,
}

impl FlakyStore {
    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

fn is_status_only(update: &ContractUpdate) -> bool {
    let status_only = ContractUpdate {
        expected_status: update.expected_status,
        status: update.status,
        updated_at: update.updated_at,
        ..ContractUpdate::default()
    };
    *update == status_only
}

#[async_trait]
impl ContractStore for FlakyStore {
    async fn get(&self, contract_id: Uuid) -> Result<Option<ContractRecord>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(anyhow!("store read timed out"));
        }
        self.inner.get(contract_id).await
    }

    async fn create(&self, record: &ContractRecord) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("store write throttled"));
        }
        self.inner.create(record).await
    }

    async fn update(&self, contract_id: Uuid, update: &ContractUpdate) -> Result<ContractRecord> {
        if self.fail_all_updates.load(Ordering::SeqCst)
            || self.fail_next_update.swap(false, Ordering::SeqCst)
            || (self.fail_result_updates.load(Ordering::SeqCst) && !is_status_only(update))
        {
            return Err(anyhow!("store write throttled"));
        }
        self.inner.update(contract_id, update).await
    }

    async fn query_by_owner(&self, query: &OwnerQuery) -> Result<OwnerPage> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(anyhow!("store query failed"));
        }
        self.inner.query_by_owner(query).await
    }
}

pub fn services(
    store: Arc<dyn ContractStore>,
    storage: Arc<dyn ObjectStorage>,
    extractor: Arc<dyn TextExtractionService>,
    analyzer: Arc<dyn AnalysisService>,
    language: Arc<dyn LanguageService>,
) -> PipelineServices {
    PipelineServices {
        store,
        storage,
        extractor,
        analyzer,
        language,
    }
}

/// A model reply in the requested schema.
pub const MODEL_REPLY: &str = r#"Here is the analysis:
{"key_terms":["Term: 12 months","Fee: $5,000"],"risks":["Unlimited liability","Auto-renewal"],"missing_clauses":["Termination for convenience"],"unusual_provisions":[],"compliance_issues":[],"recommendations":["Cap liability"],"summary":"Standard services agreement with two notable risks."}
Let me know if you need more."#;
