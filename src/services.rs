//! Interfaces to the managed services the pipeline depends on.
//!
//! Each collaborator is a trait object so stages receive explicitly
//! constructed handles and tests can substitute doubles.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repository::ContractStore;

/// Location of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Storage bucket
    pub bucket: String,
    /// Object key inside the bucket
    pub key: String,
}

impl ObjectRef {
    /// Reference to `key` in `bucket`.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Time-limited permission to write one object with one content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCredential {
    /// URL the client writes to
    pub url: String,
    /// Expiry of the credential
    pub expires_at: DateTime<Utc>,
}

/// Object storage for uploaded files.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Size in bytes from a metadata probe.
    async fn object_size(&self, object: &ObjectRef) -> Result<u64>;

    /// Full object contents.
    async fn read_object(&self, object: &ObjectRef) -> Result<Vec<u8>>;

    /// Issue a credential the client uses to upload directly.
    async fn issue_upload_credential(
        &self,
        object: &ObjectRef,
        content_type: &str,
        expires_in: std::time::Duration,
    ) -> Result<UploadCredential>;
}

/// Kind of block returned by the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
}

/// One detected block of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Block granularity
    pub block_type: BlockType,
    /// Detected text; absent on PAGE blocks
    #[serde(default)]
    pub text: Option<String>,
    /// Page identifier, when the service reports one.
    #[serde(default)]
    pub page: Option<u32>,
    /// Confidence 0-100, when the service reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl TextBlock {
    /// A LINE block on `page`.
    pub fn line(text: &str, page: u32, confidence: f64) -> Self {
        Self {
            block_type: BlockType::Line,
            text: Some(text.to_string()),
            page: Some(page),
            confidence: Some(confidence),
        }
    }

    /// A PAGE marker.
    pub const fn page(page: u32) -> Self {
        Self {
            block_type: BlockType::Page,
            text: None,
            page: Some(page),
            confidence: None,
        }
    }
}

/// Status of an asynchronous extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// One page of asynchronous job results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPage {
    /// Job state at the time of the call
    pub job_status: JobStatus,
    /// Result blocks; empty unless the job succeeded
    pub blocks: Vec<TextBlock>,
    /// Token for the next result page, if any
    pub next_token: Option<String>,
    /// Failure reason reported by the service
    #[serde(default)]
    pub status_message: Option<String>,
}

/// Document text extraction service.
#[async_trait]
pub trait TextExtractionService: Send + Sync {
    /// Synchronous detection over a stored document.
    async fn detect_document_text(&self, object: &ObjectRef) -> Result<Vec<TextBlock>>;

    /// Start an asynchronous detection job and return its id.
    async fn start_text_detection(&self, object: &ObjectRef) -> Result<String>;

    /// Job status plus one page of results, resumed from `next_token`.
    async fn get_text_detection(&self, job_id: &str, next_token: Option<&str>) -> Result<DetectionPage>;
}

/// Language-model analysis service: free-text prompt in, free-text reply out.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// An entity detected by the language service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    /// Matched text
    pub text: String,
    /// Type label, e.g. `DATE` or `ORGANIZATION`
    pub entity_type: String,
    /// Detection confidence in `[0, 1]`
    pub score: f64,
}

/// Sentiment and entity detection.
#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn detect_sentiment(
        &self,
        text: &str,
        language_code: &str,
    ) -> Result<crate::models::SentimentAnalysis>;

    async fn detect_entities(&self, text: &str, language_code: &str) -> Result<Vec<DetectedEntity>>;
}

/// Input handed to the orchestrator for one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInput {
    /// Contract to process
    pub contract_id: Uuid,
    /// Bucket of the uploaded document
    pub storage_bucket: String,
    /// Key of the uploaded document
    pub storage_key: String,
}

impl ExecutionInput {
    /// The uploaded document.
    #[must_use]
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(self.storage_bucket.clone(), self.storage_key.clone())
    }
}

/// Workflow orchestrator that sequences the stage invocations.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Start a named execution; returns an execution identifier.
    async fn start_execution(&self, name: &str, input: &ExecutionInput) -> Result<String>;
}

/// Service handles shared by every stage.
#[derive(Clone)]
pub struct PipelineServices {
    /// Metadata store
    pub store: Arc<dyn ContractStore>,
    /// Uploaded documents
    pub storage: Arc<dyn ObjectStorage>,
    /// Text detection
    pub extractor: Arc<dyn TextExtractionService>,
    /// Language model
    pub analyzer: Arc<dyn AnalysisService>,
    /// Sentiment and entities
    pub language: Arc<dyn LanguageService>,
}
