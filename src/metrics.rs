use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::lifecycle::ContractStatus;

/// Metric names used by the pipeline stages.
///
/// Values are emitted through the `metrics` facade; nothing is recorded
/// unless the binary installs a recorder.
#[derive(Debug, Clone, Copy)]
pub struct PipelineMetrics {
    // Stage metrics
    pub stage_runs_total: &'static str,
    pub stage_duration: &'static str,

    // Lifecycle metrics
    pub status_transitions_total: &'static str,
    pub dropped_status_writes_total: &'static str,

    // Extraction metrics
    pub extraction_poll_attempts: &'static str,
    pub extraction_pages: &'static str,

    // Analysis metrics
    pub degraded_substeps_total: &'static str,
    pub risk_scores: &'static str,

    // Intake metrics
    pub uploads_total: &'static str,
    pub orchestration_failures_total: &'static str,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            stage_runs_total: "contract_pipeline_stage_runs_total",
            stage_duration: "contract_pipeline_stage_duration_seconds",

            status_transitions_total: "contract_pipeline_status_transitions_total",
            dropped_status_writes_total: "contract_pipeline_dropped_status_writes_total",

            extraction_poll_attempts: "contract_pipeline_extraction_poll_attempts",
            extraction_pages: "contract_pipeline_extraction_pages",

            degraded_substeps_total: "contract_pipeline_degraded_substeps_total",
            risk_scores: "contract_pipeline_risk_scores",

            uploads_total: "contract_pipeline_uploads_total",
            orchestration_failures_total: "contract_pipeline_orchestration_failures_total",
        }
    }
}

impl PipelineMetrics {
    /// Record one stage run and how long it took
    pub fn record_stage(&self, stage: &'static str, duration: Duration, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!(self.stage_runs_total, "stage" => stage, "outcome" => outcome).increment(1);
        histogram!(self.stage_duration, "stage" => stage).record(duration.as_secs_f64());
    }

    /// Record a status written to a record
    pub fn record_transition(&self, status: ContractStatus) {
        counter!(self.status_transitions_total, "status" => status.as_str()).increment(1);
    }

    /// Record a status write that was swallowed
    pub fn record_dropped_status_write(&self, reason: &'static str) {
        counter!(self.dropped_status_writes_total, "reason" => reason).increment(1);
    }

    /// Record how many status checks an async extraction needed
    pub fn record_extraction(&self, poll_attempts: u32, page_count: u32) {
        gauge!(self.extraction_poll_attempts).set(f64::from(poll_attempts));
        histogram!(self.extraction_pages).record(f64::from(page_count));
    }

    /// Record an analysis sub-step that fell back to a default
    pub fn record_degraded(&self, substep: &'static str) {
        counter!(self.degraded_substeps_total, "substep" => substep).increment(1);
    }

    /// Record a computed risk score
    pub fn record_risk_score(&self, score: f64) {
        histogram!(self.risk_scores).record(score);
    }

    /// Record an accepted upload
    pub fn record_upload(&self, content_type: &str) {
        counter!(self.uploads_total, "content_type" => content_type.to_string()).increment(1);
    }

    /// Record an orchestrator kickoff that failed
    pub fn record_orchestration_failure(&self) {
        counter!(self.orchestration_failures_total).increment(1);
    }
}
