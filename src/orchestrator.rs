//! In-process orchestrator.
//!
//! Runs extraction then analysis for one contract, passing the extraction
//! output as the analysis input. At most one stage per contract is in flight
//! because the two stages run sequentially inside one task.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use tracing::{error, info};
use uuid::Uuid;

use crate::analysis::{AnalysisInput, AnalysisOutcome, AnalysisStage};
use crate::error::Result;
use crate::extraction::{ExtractionInput, TextExtractionStage};
use crate::services::{ExecutionInput, Orchestrator};

/// Sequences the pipeline stages in the current process.
#[derive(Clone)]
pub struct LocalOrchestrator {
    extraction: Arc<TextExtractionStage>,
    analysis: Arc<AnalysisStage>,
}

impl LocalOrchestrator {
    /// Orchestrator running `extraction` then `analysis`.
    pub fn new(extraction: Arc<TextExtractionStage>, analysis: Arc<AnalysisStage>) -> Self {
        Self { extraction, analysis }
    }

    /// Run both stages to completion for one contract.
    pub async fn run(&self, input: &ExecutionInput) -> Result<AnalysisOutcome> {
        let request_id = Uuid::new_v4().to_string();

        let extraction_input = ExtractionInput {
            contract_id: input.contract_id,
            object: input.object(),
        };
        let extracted = self.extraction.run(&extraction_input, &request_id).await?;

        let analysis_input = AnalysisInput::from(&extracted);
        self.analysis.run(&analysis_input, &request_id).await
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    async fn start_execution(&self, name: &str, input: &ExecutionInput) -> AnyResult<String> {
        let execution_id = format!("{name}:{}", Uuid::new_v4());
        let orchestrator = self.clone();
        let input = input.clone();
        let id = execution_id.clone();

        tokio::spawn(async move {
            match orchestrator.run(&input).await {
                Ok(outcome) => {
                    info!(execution_id = %id, contract_id = %input.contract_id, risk_score = outcome.risk_score, "Execution succeeded");
                }
                Err(err) => {
                    error!(execution_id = %id, contract_id = %input.contract_id, code = err.code(), error = %err, "Execution failed");
                }
            }
        });

        Ok(execution_id)
    }
}
