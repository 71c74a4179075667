//! Best-effort status channel.
//!
//! Status writes never propagate errors. A stage's primary writes (the move
//! into its processing state and its result write) go through the store
//! directly and fail the stage; the status-only writes made here report
//! what happened as a [`StatusWrite`] value instead.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::lifecycle::ContractStatus;
use crate::metrics::PipelineMetrics;
use crate::models::ContractRecord;
use crate::repository::{ContractStore, ContractUpdate};

/// Outcome of a best-effort status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusWrite {
    /// Status and `updated_at` were written
    Applied {
        /// Status the record held before the write
        previous: ContractStatus,
    },
    /// The lifecycle has no edge from the current status
    Rejected {
        /// Status the record holds
        current: ContractStatus,
    },
    /// The record could not be read or written
    Failed {
        /// Store error text
        reason: String,
    },
}

impl StatusWrite {
    /// True when the write reached the store.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Writes lifecycle status and a refreshed timestamp.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn ContractStore>,
    metrics: PipelineMetrics,
}

impl StatusTracker {
    /// Tracker writing to `store`.
    pub fn new(store: Arc<dyn ContractStore>) -> Self {
        Self {
            store,
            metrics: PipelineMetrics::default(),
        }
    }

    /// Load the record a stage is about to work on and mark it `processing`.
    ///
    /// The guard is part of the stage's primary channel. An absent record, a
    /// forbidden edge or a failed read or write is returned as an error
    /// before any work starts, so a stage never runs without its record
    /// holding `processing`. Returns the record as it was before the write.
    pub async fn begin(&self, contract_id: Uuid, processing: ContractStatus) -> Result<ContractRecord> {
        let record = self
            .store
            .get(contract_id)
            .await
            .map_err(|err| {
                PlatformError::Persistence(format!("Failed to fetch contract details: {err:#}"))
            })?
            .ok_or_else(|| PlatformError::NotFound(contract_id.to_string()))?;

        record.status.ensure_transition(processing)?;
        let update = ContractUpdate::status(processing, Utc::now()).when_status(record.status);
        self.store.update(contract_id, &update).await.map_err(|err| {
            PlatformError::Persistence(format!("Failed to update contract status: {err:#}"))
        })?;
        debug!(%contract_id, from = %record.status, to = %processing, "Contract status updated");
        self.metrics.record_transition(processing);
        Ok(record)
    }

    /// Move `contract_id` to `status`, swallowing every failure.
    pub async fn set_status(&self, contract_id: Uuid, status: ContractStatus) -> StatusWrite {
        let outcome = self.try_set_status(contract_id, status).await;
        match &outcome {
            StatusWrite::Applied { previous } => {
                debug!(%contract_id, from = %previous, to = %status, "Contract status updated");
                self.metrics.record_transition(status);
            }
            StatusWrite::Rejected { current } => {
                warn!(%contract_id, from = %current, to = %status, "Refusing status update outside the lifecycle");
                self.metrics.record_dropped_status_write("rejected");
            }
            StatusWrite::Failed { reason } => {
                warn!(%contract_id, to = %status, error = %reason, "Failed to update contract status");
                self.metrics.record_dropped_status_write("store_error");
            }
        }
        outcome
    }

    async fn try_set_status(&self, contract_id: Uuid, status: ContractStatus) -> StatusWrite {
        let current = match self.store.get(contract_id).await {
            Ok(Some(record)) => record.status,
            Ok(None) => {
                return StatusWrite::Failed {
                    reason: format!("Contract {contract_id} not found"),
                }
            }
            Err(err) => return StatusWrite::Failed { reason: format!("{err:#}") },
        };

        if !current.can_transition_to(status) {
            return StatusWrite::Rejected { current };
        }

        match self
            .store
            .update(contract_id, &ContractUpdate::status(status, Utc::now()))
            .await
        {
            Ok(_) => StatusWrite::Applied { previous: current },
            Err(err) => StatusWrite::Failed { reason: format!("{err:#}") },
        }
    }
}
