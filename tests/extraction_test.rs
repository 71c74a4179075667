//! Integration tests for the text extraction stage

mod common;

use std::sync::Arc;

use contract_pipeline::config::ExtractionConfig;
use contract_pipeline::error::{ErrorKind, PlatformError};
use contract_pipeline::extraction::{ExtractionInput, TextExtractionStage};
use contract_pipeline::repository::ContractUpdate;
use contract_pipeline::services::{DetectionPage, JobStatus, TextBlock};
use contract_pipeline::{ContractStatus, ContractStore, MemoryContractStore};

use common::{
    in_progress, object, seed, succeeded, FixedLanguage, FixedStorage, FlakyStore, ScriptedAnalyzer,
    ScriptedExtractor, OWNER,
};

const THRESHOLD: u64 = 1000;

fn config(max_poll_attempts: u32) -> ExtractionConfig {
    ExtractionConfig {
        async_threshold_bytes: THRESHOLD,
        poll_interval_ms: 0,
        max_poll_attempts,
        result_page_size: 100,
    }
}

fn stage(
    store: Arc<dyn ContractStore>,
    size: u64,
    extractor: Arc<ScriptedExtractor>,
    max_poll_attempts: u32,
) -> TextExtractionStage {
    let services = common::services(
        store,
        Arc::new(FixedStorage::sized(size)),
        extractor,
        Arc::new(ScriptedAnalyzer::failing()),
        Arc::new(FixedLanguage::failing()),
    );
    TextExtractionStage::new(&services, config(max_poll_attempts))
}

fn contract_lines() -> Vec<TextBlock> {
    vec![
        TextBlock::page(1),
        TextBlock::line("SERVICES AGREEMENT", 1, 98.0),
        TextBlock::line("1. Term. Twelve months.", 1, 96.0),
        TextBlock::page(2),
        TextBlock::line("2. Fees. $5,000 per month.", 2, 94.0),
    ]
}

#[tokio::test]
async fn test_small_document_uses_synchronous_extraction() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 512, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let outcome = stage.run(&input, "req-1").await.expect("extraction succeeds");

    assert_eq!(outcome.status, ContractStatus::TextExtracted);
    assert_eq!(
        outcome.extracted_text,
        "SERVICES AGREEMENT\n1. Term. Twelve months.\n2. Fees. $5,000 per month."
    );
    assert_eq!(outcome.page_count, 2);
    assert!((outcome.extraction_confidence - 96.0).abs() < 1e-9);
    assert_eq!(extractor.calls(), (1, 0, 0));

    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::TextExtracted);
    assert_eq!(stored.extracted_text.as_deref(), Some(outcome.extracted_text.as_str()));
    assert_eq!(stored.page_count, Some(2));
    assert!(stored.updated_at >= record.updated_at);
}

#[tokio::test]
async fn test_threshold_size_stays_synchronous() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), THRESHOLD, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    stage.run(&input, "req-1").await.expect("extraction succeeds");
    assert_eq!(extractor.calls(), (1, 0, 0));
}

#[tokio::test]
async fn test_large_document_polls_then_pages_through_results() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;

    let blocks = contract_lines();
    let extractor = Arc::new(ScriptedExtractor::asynchronous(
        vec![
            in_progress(),
            in_progress(),
            succeeded(blocks[..3].to_vec(), Some("page-2")),
        ],
        vec![("page-2", succeeded(blocks[3..].to_vec(), None))],
    ));
    let stage = stage(store.clone(), THRESHOLD + 1, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let outcome = stage.run(&input, "req-1").await.expect("extraction succeeds");

    assert_eq!(
        outcome.extracted_text,
        "SERVICES AGREEMENT\n1. Term. Twelve months.\n2. Fees. $5,000 per month."
    );
    assert_eq!(outcome.page_count, 2);
    // three status checks plus one continuation page
    assert_eq!(extractor.calls(), (0, 1, 4));
}

#[tokio::test]
async fn test_job_that_never_finishes_times_out() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor::asynchronous(
        (0..60).map(|_| in_progress()).collect(),
        Vec::new(),
    ));
    let stage = stage(store.clone(), THRESHOLD * 10, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert!(matches!(err, PlatformError::ExtractionTimeout { attempts: 60, .. }));
    assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    assert_eq!(extractor.calls(), (0, 1, 60));

    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::TextExtractionFailed);
    assert!(stored.extracted_text.is_none());
}

#[tokio::test]
async fn test_failed_job_reports_its_reason() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor::asynchronous(
        vec![DetectionPage {
            job_status: JobStatus::Failed,
            blocks: Vec::new(),
            next_token: None,
            status_message: Some("document is encrypted".to_string()),
        }],
        Vec::new(),
    ));
    let stage = stage(store.clone(), THRESHOLD * 2, extractor, 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    assert!(err.to_string().contains("document is encrypted"));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::TextExtractionFailed);
}

#[tokio::test]
async fn test_repeated_continuation_token_is_rejected() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor::asynchronous(
        vec![succeeded(contract_lines(), Some("loop"))],
        vec![("loop", succeeded(Vec::new(), Some("loop")))],
    ));
    let stage = stage(store.clone(), THRESHOLD * 2, extractor, 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
}

#[tokio::test]
async fn test_service_failure_marks_the_contract_failed() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    let extractor = Arc::new(ScriptedExtractor {
        fail_sync: true,
        ..ScriptedExtractor::default()
    });
    let stage = stage(store.clone(), 10, extractor, 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailure);
    assert!(err.to_string().contains("unsupported document format"));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::TextExtractionFailed);
}

#[tokio::test]
async fn test_forbidden_edge_is_rejected_before_any_work() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::AnalysisCompleted).await;
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 10, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert!(matches!(
        err,
        PlatformError::InvalidTransition {
            from: ContractStatus::AnalysisCompleted,
            to: ContractStatus::ProcessingTextExtraction,
        }
    ));
    assert_eq!(extractor.calls(), (0, 0, 0));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_unknown_contract_is_not_found() {
    let store = Arc::new(MemoryContractStore::new());
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store, 10, extractor, 60);

    let input = ExtractionInput {
        contract_id: uuid::Uuid::new_v4(),
        object: contract_pipeline::services::ObjectRef::new("contracts", "missing.pdf"),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_failed_result_write_is_a_persistence_error() {
    let store = Arc::new(FlakyStore::default());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    FlakyStore::set(&store.fail_result_updates);
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 10, extractor, 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert!(err.to_string().starts_with("Failed to update contract metadata"));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::TextExtractionFailed);
    assert!(stored.extracted_text.is_none());
}

#[tokio::test]
async fn test_failed_processing_write_stops_the_stage() {
    let store = Arc::new(FlakyStore::default());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    FlakyStore::set(&store.fail_all_updates);
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 10, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert!(err.to_string().starts_with("Failed to update contract status"));
    assert_eq!(extractor.calls(), (0, 0, 0));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::Uploaded);
}

#[tokio::test]
async fn test_transient_processing_write_failure_never_skips_a_state() {
    let store = Arc::new(FlakyStore::default());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;
    FlakyStore::set(&store.fail_next_update);
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 10, extractor.clone(), 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let err = stage.run(&input, "req-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert_eq!(extractor.calls(), (0, 0, 0));
    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::Uploaded);
    assert!(stored.extracted_text.is_none());

    let outcome = stage.run(&input, "req-2").await.expect("second attempt succeeds");
    assert_eq!(outcome.status, ContractStatus::TextExtracted);
    assert_eq!(extractor.calls(), (1, 0, 0));
}

#[tokio::test]
async fn test_result_write_requires_the_processing_state() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::Uploaded).await;

    let update = ContractUpdate {
        extracted_text: Some("text".to_string()),
        ..ContractUpdate::status(ContractStatus::TextExtracted, chrono::Utc::now())
    }
    .when_status(ContractStatus::ProcessingTextExtraction);
    assert!(store.update(record.contract_id, &update).await.is_err());

    let stored = store.get(record.contract_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContractStatus::Uploaded);
    assert!(stored.extracted_text.is_none());
}

#[tokio::test]
async fn test_failed_extraction_can_be_retried() {
    let store = Arc::new(MemoryContractStore::new());
    let record = seed(store.as_ref(), OWNER, ContractStatus::TextExtractionFailed).await;
    let extractor = Arc::new(ScriptedExtractor::sync(contract_lines()));
    let stage = stage(store.clone(), 10, extractor, 60);

    let input = ExtractionInput {
        contract_id: record.contract_id,
        object: object(&record),
    };
    let outcome = stage.run(&input, "req-2").await.expect("retry succeeds");
    assert_eq!(outcome.status, ContractStatus::TextExtracted);
}
