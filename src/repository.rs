use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::ContractStatus;
use crate::models::{AnalysisResults, ContractRecord};

/// Metadata store holding one record per contract.
///
/// Writes are last-writer-wins per field unless the update names the status
/// the record must still hold, in which case the check and the write happen
/// in one step.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Fetch a record by identifier.
    async fn get(&self, contract_id: Uuid) -> Result<Option<ContractRecord>>;

    /// Insert a new record. Fails if the identifier is already taken.
    async fn create(&self, record: &ContractRecord) -> Result<()>;

    /// Apply a field update atomically and return the updated record.
    /// Fails if the record does not exist or no longer holds
    /// [`ContractUpdate::expected_status`].
    async fn update(&self, contract_id: Uuid, update: &ContractUpdate) -> Result<ContractRecord>;

    /// Records owned by a user, newest first.
    async fn query_by_owner(&self, query: &OwnerQuery) -> Result<OwnerPage>;
}

/// A set of field writes applied to one record in a single step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractUpdate {
    /// Apply only while the record holds this status
    pub expected_status: Option<ContractStatus>,
    /// New lifecycle status
    pub status: Option<ContractStatus>,
    /// Refreshed timestamp; never moves backwards
    pub updated_at: Option<DateTime<Utc>>,
    pub extracted_text: Option<String>,
    pub page_count: Option<u32>,
    pub extraction_confidence: Option<f64>,
    pub analysis_results: Option<AnalysisResults>,
    pub risk_score: Option<f64>,
    pub key_terms: Option<Vec<String>>,
    pub missing_clauses: Option<Vec<String>>,
}

impl ContractUpdate {
    /// Status-only write with a refreshed timestamp.
    #[must_use]
    pub fn status(status: ContractStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Make the write conditional on the record still holding `status`.
    #[must_use]
    pub fn when_status(mut self, status: ContractStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Fail when the record has moved away from the expected status.
    pub fn check(&self, record: &ContractRecord) -> Result<()> {
        match self.expected_status {
            Some(expected) if record.status != expected => Err(anyhow!(
                "Contract {} is {}, expected {expected}",
                record.contract_id,
                record.status
            )),
            _ => Ok(()),
        }
    }

    /// Copy the populated fields onto `record`.
    ///
    /// `updated_at` never moves backwards.
    pub fn apply(&self, record: &mut ContractRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = record.updated_at.max(updated_at);
        }
        if let Some(text) = &self.extracted_text {
            record.extracted_text = Some(text.clone());
        }
        if let Some(pages) = self.page_count {
            record.page_count = Some(pages);
        }
        if let Some(confidence) = self.extraction_confidence {
            record.extraction_confidence = Some(confidence);
        }
        if let Some(results) = &self.analysis_results {
            record.analysis_results = Some(results.clone());
        }
        if let Some(score) = self.risk_score {
            record.risk_score = Some(score);
        }
        if let Some(terms) = &self.key_terms {
            record.key_terms = Some(terms.clone());
        }
        if let Some(missing) = &self.missing_clauses {
            record.missing_clauses = Some(missing.clone());
        }
    }
}

/// Position in the owner index: the last record of a returned page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageKey {
    /// Owner the page was listed for
    pub user_id: String,
    /// Creation time of the last returned record
    pub created_at: DateTime<Utc>,
    /// Tie-breaker for records created at the same instant
    pub contract_id: Uuid,
}

impl PageKey {
    /// Index position of a record.
    #[must_use]
    pub fn of(record: &ContractRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            created_at: record.created_at,
            contract_id: record.contract_id,
        }
    }

    /// Whether `record` sorts strictly after this key in newest-first order.
    #[must_use]
    pub fn precedes(&self, record: &ContractRecord) -> bool {
        (record.created_at, record.contract_id) < (self.created_at, self.contract_id)
    }
}

/// Query over the owner index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerQuery {
    /// Owner whose records are listed
    pub user_id: String,
    /// Page size, at least 1
    pub limit: usize,
    /// Only records in this status
    pub status: Option<ContractStatus>,
    /// Resume after this key
    pub start_after: Option<PageKey>,
}

/// One page of an owner query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerPage {
    /// Newest first
    pub items: Vec<ContractRecord>,
    /// Set when more matching records exist after this page.
    pub last_key: Option<PageKey>,
}

/// Cut a page out of records already ordered newest first and positioned
/// after the query's start key.
pub(crate) fn collect_page<I>(records: I, query: &OwnerQuery) -> OwnerPage
where
    I: IntoIterator<Item = ContractRecord>,
{
    let limit = query.limit.max(1);
    let mut items: Vec<ContractRecord> = records
        .into_iter()
        .filter(|record| query.status.map_or(true, |status| record.status == status))
        .take(limit + 1)
        .collect();

    let last_key = if items.len() > limit {
        items.truncate(limit);
        items.last().map(PageKey::of)
    } else {
        None
    };

    OwnerPage { items, last_key }
}

/// In-process store used by tests and single-run tooling.
#[derive(Debug, Default)]
pub struct MemoryContractStore {
    records: RwLock<HashMap<Uuid, ContractRecord>>,
}

impl MemoryContractStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map_or(0, |records| records.len())
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContractStore for MemoryContractStore {
    async fn get(&self, contract_id: Uuid) -> Result<Option<ContractRecord>> {
        let records = self.records.read().map_err(|_| anyhow!("Record lock poisoned"))?;
        Ok(records.get(&contract_id).cloned())
    }

    async fn create(&self, record: &ContractRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| anyhow!("Record lock poisoned"))?;
        if records.contains_key(&record.contract_id) {
            return Err(anyhow!("Contract {} already exists", record.contract_id));
        }
        records.insert(record.contract_id, record.clone());
        Ok(())
    }

    async fn update(&self, contract_id: Uuid, update: &ContractUpdate) -> Result<ContractRecord> {
        let mut records = self.records.write().map_err(|_| anyhow!("Record lock poisoned"))?;
        let record = records
            .get_mut(&contract_id)
            .ok_or_else(|| anyhow!("Contract {contract_id} does not exist"))?;
        update.check(record)?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn query_by_owner(&self, query: &OwnerQuery) -> Result<OwnerPage> {
        let records = self.records.read().map_err(|_| anyhow!("Record lock poisoned"))?;
        let mut owned: Vec<ContractRecord> = records
            .values()
            .filter(|record| record.user_id == query.user_id)
            .filter(|record| query.start_after.as_ref().map_or(true, |key| key.precedes(record)))
            .cloned()
            .collect();
        owned.sort_by(|a, b| (b.created_at, b.contract_id).cmp(&(a.created_at, a.contract_id)));
        Ok(collect_page(owned, query))
    }
}
