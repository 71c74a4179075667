//! Unit tests for metrics.rs module

use std::collections::HashSet;
use std::time::Duration;

use contract_pipeline::metrics::PipelineMetrics;
use contract_pipeline::ContractStatus;

#[test]
fn test_metric_names_are_unique() {
    let metrics = PipelineMetrics::default();
    let names = [
        metrics.stage_runs_total,
        metrics.stage_duration,
        metrics.status_transitions_total,
        metrics.dropped_status_writes_total,
        metrics.extraction_poll_attempts,
        metrics.extraction_pages,
        metrics.degraded_substeps_total,
        metrics.risk_scores,
        metrics.uploads_total,
        metrics.orchestration_failures_total,
    ];
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(unique.len(), names.len());
}

#[test]
fn test_counters_end_in_total() {
    let metrics = PipelineMetrics::default();
    for name in [
        metrics.stage_runs_total,
        metrics.status_transitions_total,
        metrics.dropped_status_writes_total,
        metrics.degraded_substeps_total,
        metrics.uploads_total,
        metrics.orchestration_failures_total,
    ] {
        assert!(name.ends_with("_total"), "{name}");
    }
}

#[test]
fn test_recording_without_a_recorder_is_a_no_op() {
    let metrics = PipelineMetrics::default();
    metrics.record_stage("text_extraction", Duration::from_millis(120), true);
    metrics.record_stage("ai_analysis", Duration::from_secs(3), false);
    metrics.record_transition(ContractStatus::TextExtracted);
    metrics.record_dropped_status_write("rejected");
    metrics.record_extraction(12, 4);
    metrics.record_degraded("sentiment");
    metrics.record_risk_score(42.5);
    metrics.record_upload("application/pdf");
    metrics.record_orchestration_failure();
}
