//! Read-only projections over the metadata store.
//!
//! Every read checks ownership before returning anything. An unknown
//! contract is `NotFound`, somebody else's contract is `Authorization`.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::{PlatformError, Result};
use crate::lifecycle::ContractStatus;
use crate::models::{AnalysisResults, ContractRecord};
use crate::repository::{ContractStore, OwnerQuery, PageKey};
use crate::validation::InputValidator;

/// Message carried by the analysis placeholder.
pub const ANALYSIS_PENDING_MESSAGE: &str = "Analysis not yet available";

/// Contract fields safe to return to the owner.
///
/// Excludes the extracted text and the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub contract_id: Uuid,
    pub filename: String,
    pub file_size: u64,
    pub content_type: String,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

impl ContractSummary {
    /// Single-record projection.
    #[must_use]
    pub fn from_record(record: &ContractRecord) -> Self {
        Self {
            contract_id: record.contract_id,
            filename: record.filename.clone(),
            file_size: record.file_size,
            content_type: record.content_type.clone(),
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            page_count: record.page_count,
            extraction_confidence: record.extraction_confidence,
            risk_score: record.risk_score,
        }
    }

    /// List item projection; carries no extraction confidence.
    #[must_use]
    pub fn list_item(record: &ContractRecord) -> Self {
        Self {
            extraction_confidence: None,
            ..Self::from_record(record)
        }
    }
}

/// Completed analysis of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    pub contract_id: Uuid,
    pub status: ContractStatus,
    pub analysis_results: AnalysisResults,
    pub risk_score: f64,
    pub key_terms: Vec<String>,
    pub missing_clauses: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Placeholder returned while analysis has not run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPending {
    /// Contract queried
    pub contract_id: Uuid,
    /// Current lifecycle status
    pub status: ContractStatus,
    /// Fixed "not yet available" message
    pub message: String,
}

/// Analysis projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisView {
    Available(AnalysisDetails),
    Pending(AnalysisPending),
}

impl AnalysisView {
    /// Details when results are stored, the pending placeholder otherwise.
    #[must_use]
    pub fn from_record(record: &ContractRecord) -> Self {
        match &record.analysis_results {
            Some(results) => Self::Available(AnalysisDetails {
                contract_id: record.contract_id,
                status: record.status,
                analysis_results: results.clone(),
                risk_score: record.risk_score.unwrap_or_default(),
                key_terms: record.key_terms.clone().unwrap_or_default(),
                missing_clauses: record.missing_clauses.clone().unwrap_or_default(),
                updated_at: record.updated_at,
            }),
            None => Self::Pending(AnalysisPending {
                contract_id: record.contract_id,
                status: record.status,
                message: ANALYSIS_PENDING_MESSAGE.to_string(),
            }),
        }
    }
}

/// Raw list parameters as they arrive in a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// Page size; defaults and caps come from config
    pub limit: Option<String>,
    /// Lifecycle status filter
    pub status: Option<String>,
    /// Continuation token from a previous page
    pub last_key: Option<String>,
}

/// One page of the owner's contracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractList {
    /// Newest first
    pub contracts: Vec<ContractSummary>,
    /// Items on this page
    pub count: usize,
    /// Present when more records follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key: Option<String>,
}

/// Encode a store page key as an opaque continuation token.
pub fn encode_page_token(key: &PageKey) -> Result<String> {
    let json = serde_json::to_vec(key)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a caller-supplied continuation token.
pub fn decode_page_token(token: &str) -> Result<PageKey> {
    let invalid = || PlatformError::Validation("Invalid pagination token".to_string());
    let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
    serde_json::from_slice(&bytes).map_err(|_| invalid())
}

/// Query projections over the metadata store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn ContractStore>,
    config: ApiConfig,
}

impl QueryService {
    /// Queries over `store` with the configured page sizes.
    pub fn new(store: Arc<dyn ContractStore>, config: ApiConfig) -> Self {
        Self { store, config }
    }

    async fn owned_record(&self, contract_id: &str, user_id: &str, failure: &str) -> Result<ContractRecord> {
        let id = InputValidator::parse_contract_id(contract_id)?;
        let record = self
            .store
            .get(id)
            .await
            .map_err(|err| {
                error!(%contract_id, %user_id, error = %err, "{failure}");
                PlatformError::Persistence(failure.to_string())
            })?
            .ok_or_else(|| PlatformError::NotFound(contract_id.to_string()))?;

        if !record.is_owned_by(user_id) {
            return Err(PlatformError::Authorization("Access denied to this contract".to_string()));
        }
        Ok(record)
    }

    /// Redacted single-record projection.
    pub async fn get_contract(&self, contract_id: &str, user_id: &str) -> Result<ContractSummary> {
        info!(%contract_id, %user_id, "Fetching contract details");
        let record = self
            .owned_record(contract_id, user_id, "Failed to fetch contract details")
            .await?;
        Ok(ContractSummary::from_record(&record))
    }

    /// Analysis projection, or a placeholder while analysis is pending.
    pub async fn get_analysis(&self, contract_id: &str, user_id: &str) -> Result<AnalysisView> {
        info!(%contract_id, %user_id, "Fetching contract analysis");
        let record = self
            .owned_record(contract_id, user_id, "Failed to fetch contract analysis")
            .await?;
        Ok(AnalysisView::from_record(&record))
    }

    /// The owner's contracts, newest first.
    pub async fn list_contracts(&self, user_id: &str, params: &ListParams) -> Result<ContractList> {
        info!(%user_id, "Listing user contracts");

        let limit = InputValidator::parse_limit(
            params.limit.as_deref(),
            self.config.default_page_size,
            self.config.max_page_size,
        )?;
        let status = InputValidator::parse_status_filter(params.status.as_deref())?;
        let start_after = params
            .last_key
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(decode_page_token)
            .transpose()?;

        if let Some(key) = &start_after {
            if key.user_id != user_id {
                return Err(PlatformError::Authorization(
                    "Pagination token does not belong to this user".to_string(),
                ));
            }
        }

        let query = OwnerQuery {
            user_id: user_id.to_string(),
            limit,
            status,
            start_after,
        };
        let page = self.store.query_by_owner(&query).await.map_err(|err| {
            error!(%user_id, error = %err, "Failed to list contracts");
            PlatformError::Persistence("Failed to list contracts".to_string())
        })?;

        let contracts: Vec<ContractSummary> = page.items.iter().map(ContractSummary::list_item).collect();
        let last_key = page.last_key.as_ref().map(encode_page_token).transpose()?;

        Ok(ContractList {
            count: contracts.len(),
            contracts,
            last_key,
        })
    }
}
