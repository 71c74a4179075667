//! Contract lifecycle state machine.
//!
//! ```text
//! uploaded -> processing_text_extraction -> text_extracted
//!          -> processing_ai_analysis -> analysis_completed
//! processing_text_extraction -> text_extraction_failed
//! processing_ai_analysis     -> ai_analysis_failed
//! ```
//!
//! A failed stage may be re-entered at its processing state when the
//! orchestrator retries it. Writing the current status again is always allowed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Lifecycle status of a contract record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Record created, file not yet processed
    Uploaded,
    /// Text extraction stage is running
    ProcessingTextExtraction,
    /// Text extraction finished
    TextExtracted,
    /// AI analysis stage is running
    ProcessingAiAnalysis,
    /// Analysis persisted (terminal success)
    AnalysisCompleted,
    /// Text extraction failed (terminal failure)
    TextExtractionFailed,
    /// AI analysis failed (terminal failure)
    AiAnalysisFailed,
}

impl ContractStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Uploaded,
        Self::ProcessingTextExtraction,
        Self::TextExtracted,
        Self::ProcessingAiAnalysis,
        Self::AnalysisCompleted,
        Self::TextExtractionFailed,
        Self::AiAnalysisFailed,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::ProcessingTextExtraction => "processing_text_extraction",
            Self::TextExtracted => "text_extracted",
            Self::ProcessingAiAnalysis => "processing_ai_analysis",
            Self::AnalysisCompleted => "analysis_completed",
            Self::TextExtractionFailed => "text_extraction_failed",
            Self::AiAnalysisFailed => "ai_analysis_failed",
        }
    }

    /// True once the pipeline can make no further progress without a retry.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AnalysisCompleted | Self::TextExtractionFailed | Self::AiAnalysisFailed
        )
    }

    /// True for the two failure states.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::TextExtractionFailed | Self::AiAnalysisFailed)
    }

    /// True while a stage is doing work.
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::ProcessingTextExtraction | Self::ProcessingAiAnalysis)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self as u8 == next as u8 {
            return true;
        }
        matches!(
            (self, next),
            (Self::Uploaded, Self::ProcessingTextExtraction)
                | (
                    Self::ProcessingTextExtraction,
                    Self::TextExtracted | Self::TextExtractionFailed
                )
                | (Self::TextExtractionFailed, Self::ProcessingTextExtraction)
                | (Self::TextExtracted, Self::ProcessingAiAnalysis)
                | (
                    Self::ProcessingAiAnalysis,
                    Self::AnalysisCompleted | Self::AiAnalysisFailed
                )
                | (Self::AiAnalysisFailed, Self::ProcessingAiAnalysis)
        )
    }

    /// Check an edge, returning the stage error for a forbidden one.
    pub fn ensure_transition(self, next: Self) -> Result<(), PlatformError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(PlatformError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PlatformError::Validation(format!("Unknown contract status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContractStatus::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Uploaded,
            ProcessingTextExtraction,
            TextExtracted,
            ProcessingAiAnalysis,
            AnalysisCompleted,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_processing_state_cannot_be_skipped() {
        assert!(!Uploaded.can_transition_to(TextExtracted));
        assert!(!TextExtracted.can_transition_to(AnalysisCompleted));
        assert!(!Uploaded.can_transition_to(AnalysisCompleted));
    }

    #[test]
    fn test_no_revert_to_earlier_state() {
        assert!(!AnalysisCompleted.can_transition_to(ProcessingTextExtraction));
        assert!(!TextExtracted.can_transition_to(Uploaded));
        assert!(!AnalysisCompleted.can_transition_to(TextExtractionFailed));
        assert!(!ProcessingAiAnalysis.can_transition_to(TextExtractionFailed));
    }

    #[test]
    fn test_failures_reachable_only_from_their_processing_state() {
        for status in ContractStatus::ALL {
            let allowed = status.can_transition_to(TextExtractionFailed);
            assert_eq!(
                allowed,
                matches!(status, ProcessingTextExtraction | TextExtractionFailed),
                "{status}"
            );
        }
    }

    #[test]
    fn test_retry_reenters_processing_state() {
        assert!(TextExtractionFailed.can_transition_to(ProcessingTextExtraction));
        assert!(AiAnalysisFailed.can_transition_to(ProcessingAiAnalysis));
        assert!(!AiAnalysisFailed.can_transition_to(ProcessingTextExtraction));
    }

    #[test]
    fn test_round_trip_names() {
        for status in ContractStatus::ALL {
            assert_eq!(status.as_str().parse::<ContractStatus>().ok(), Some(status));
            let json = serde_json::to_string(&status).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("done".parse::<ContractStatus>().is_err());
    }
}
