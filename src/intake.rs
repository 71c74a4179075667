//! Upload intake stage.
//!
//! Validates the upload metadata, issues a time-limited upload credential,
//! creates the initial record and kicks off the orchestrator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{StorageConfig, UploadConfig};
use crate::error::{PlatformError, Result};
use crate::metrics::PipelineMetrics;
use crate::models::ContractRecord;
use crate::repository::ContractStore;
use crate::services::{ExecutionInput, ObjectRef, ObjectStorage, Orchestrator};
use crate::utils::{execution_name, storage_key};
use crate::validation::InputValidator;

/// Status reported to the client once the credential is issued.
pub const UPLOAD_READY: &str = "upload_ready";

/// Upload metadata as sent by the client. Every field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Original file name, extension included
    pub filename: Option<String>,
    /// Declared size in bytes
    pub file_size: Option<u64>,
    /// MIME type the upload will carry
    pub content_type: Option<String>,
}

/// Response to a successful upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Identifier of the new record
    pub contract_id: Uuid,
    /// Single-use upload URL
    pub upload_url: String,
    /// When `upload_url` stops working
    pub expires_at: DateTime<Utc>,
    /// Always `upload_ready`
    pub status: String,
    /// Where the client must write the file
    #[serde(skip)]
    pub object: Option<ObjectRef>,
}

/// The upload intake stage.
pub struct IntakeStage {
    store: Arc<dyn ContractStore>,
    storage: Arc<dyn ObjectStorage>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    storage_config: StorageConfig,
    upload_config: UploadConfig,
    metrics: PipelineMetrics,
}

impl IntakeStage {
    /// Intake without an orchestrator; see [`IntakeStage::with_orchestrator`].
    pub fn new(
        store: Arc<dyn ContractStore>,
        storage: Arc<dyn ObjectStorage>,
        storage_config: StorageConfig,
        upload_config: UploadConfig,
    ) -> Self {
        Self {
            store,
            storage,
            orchestrator: None,
            storage_config,
            upload_config,
            metrics: PipelineMetrics::default(),
        }
    }

    /// Start an orchestrator execution for every accepted upload.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Accept an upload request from `user_id`.
    pub async fn accept(
        &self,
        user_id: Option<&str>,
        request: &UploadRequest,
        request_id: &str,
    ) -> Result<UploadTicket> {
        let span = info_span!("document_upload", request_id);
        self.accept_inner(user_id, request).instrument(span).await
    }

    async fn accept_inner(&self, user_id: Option<&str>, request: &UploadRequest) -> Result<UploadTicket> {
        info!("Starting document upload");
        let user_id = InputValidator::require_user(user_id)?;

        let filename = InputValidator::require_field(request.filename.as_deref(), "filename")?;
        let file_size = InputValidator::require_field(request.file_size, "file_size")?;
        let content_type = InputValidator::require_field(request.content_type.as_deref(), "content_type")?;
        InputValidator::validate_filename(filename, &self.upload_config.allowed_extensions)?;
        InputValidator::validate_file_size(file_size, self.upload_config.max_file_size_bytes)?;
        InputValidator::validate_content_type(content_type)?;

        let contract_id = Uuid::new_v4();
        info!(%contract_id, %user_id, "Processing document upload");

        let object = ObjectRef::new(
            self.storage_config.bucket.clone(),
            storage_key(user_id, contract_id, filename),
        );
        let credential = self
            .storage
            .issue_upload_credential(&object, content_type, self.storage_config.upload_url_expiry())
            .await
            .map_err(|err| PlatformError::Upload(format!("Failed to generate upload URL: {err:#}")))?;

        let record = ContractRecord::new(
            contract_id,
            user_id,
            filename,
            file_size,
            content_type,
            object.key.clone(),
            Utc::now(),
        );
        if let Err(err) = self.store.create(&record).await {
            error!(%contract_id, %user_id, error = %err, "Failed to store metadata");
            return Err(PlatformError::Persistence("Failed to store contract metadata".to_string()));
        }
        info!(%contract_id, %user_id, "Metadata stored successfully");

        if let Some(orchestrator) = &self.orchestrator {
            let input = ExecutionInput {
                contract_id,
                storage_bucket: object.bucket.clone(),
                storage_key: object.key.clone(),
            };
            match orchestrator.start_execution(&execution_name(contract_id), &input).await {
                Ok(execution_id) => {
                    info!(%contract_id, %user_id, %execution_id, "Pipeline execution started");
                }
                Err(err) => {
                    warn!(%contract_id, %user_id, error = %err, "Failed to start pipeline execution");
                    self.metrics.record_orchestration_failure();
                }
            }
        }

        self.metrics.record_upload(content_type);
        info!(%contract_id, %user_id, "Document upload processed successfully");

        Ok(UploadTicket {
            contract_id,
            upload_url: credential.url,
            expires_at: credential.expires_at,
            status: UPLOAD_READY.to_string(),
            object: Some(object),
        })
    }
}
