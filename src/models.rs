//! Data models for contract records and analysis results
//!
//! This module contains the single mutable entity of the pipeline, the
//! contract record, together with the nested analysis structures the AI
//! analysis stage persists on it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::lifecycle::ContractStatus;

/// One uploaded document and everything the pipeline has learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    /// Generated identifier, immutable
    pub contract_id: Uuid,
    /// Owner identity, immutable
    pub user_id: String,
    /// Original file name supplied at upload
    pub filename: String,
    /// Declared file size in bytes
    pub file_size: u64,
    /// Declared MIME type
    pub content_type: String,
    /// Object storage key of the uploaded file
    pub storage_key: String,
    /// Lifecycle status
    pub status: ContractStatus,
    /// Creation time, immutable
    pub created_at: DateTime<Utc>,
    /// Last modification time, non-decreasing
    pub updated_at: DateTime<Utc>,
    /// Text produced by the extraction stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Number of distinct pages seen during extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Mean line confidence reported by the extraction service (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
    /// Combined analysis written by the AI analysis stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<AnalysisResults>,
    /// Bounded risk score, present only after analysis completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    /// Key terms reported by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_terms: Option<Vec<String>>,
    /// Standard clauses the model found missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_clauses: Option<Vec<String>>,
}

impl ContractRecord {
    /// Build the initial record written by upload intake
    #[must_use]
    pub fn new(
        contract_id: Uuid,
        user_id: &str,
        filename: &str,
        file_size: u64,
        content_type: &str,
        storage_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            contract_id,
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            file_size,
            content_type: content_type.to_string(),
            storage_key,
            status: ContractStatus::Uploaded,
            created_at: now,
            updated_at: now,
            extracted_text: None,
            page_count: None,
            extraction_confidence: None,
            analysis_results: None,
            risk_score: None,
            key_terms: None,
            missing_clauses: None,
        }
    }

    /// Whether `user_id` owns this record
    #[must_use]
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// The structured schema requested from the language model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractAnalysis {
    /// Key terms and conditions
    pub key_terms: Vec<String>,
    /// Identified risks and liabilities
    pub risks: Vec<String>,
    /// Standard clauses that appear to be missing
    pub missing_clauses: Vec<String>,
    /// Unusual or concerning provisions
    pub unusual_provisions: Vec<String>,
    /// Potential compliance issues
    pub compliance_issues: Vec<String>,
    /// Recommendations for improvement
    pub recommendations: Vec<String>,
    /// Brief summary
    pub summary: String,
}

impl ContractAnalysis {
    /// Structure used when the model reply carries no usable JSON
    #[must_use]
    pub fn fallback(raw_reply: &str) -> Self {
        Self {
            summary: raw_reply.to_string(),
            ..Self::default()
        }
    }
}

/// Sentiment distribution as reported by the sentiment service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentimentScores {
    /// Fraction of positive sentiment
    pub positive: f64,
    /// Fraction of negative sentiment
    pub negative: f64,
    /// Fraction of neutral sentiment
    pub neutral: f64,
    /// Fraction of mixed sentiment
    pub mixed: f64,
}

impl Default for SentimentScores {
    fn default() -> Self {
        Self {
            positive: 0.0,
            negative: 0.0,
            neutral: 1.0,
            mixed: 0.0,
        }
    }
}

/// Overall sentiment label with its score distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    /// Dominant label: POSITIVE, NEGATIVE, NEUTRAL or MIXED
    pub sentiment: String,
    /// Score distribution
    pub sentiment_scores: SentimentScores,
}

impl SentimentAnalysis {
    /// Substitute used when the sentiment service fails
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            sentiment: "NEUTRAL".to_string(),
            sentiment_scores: SentimentScores::default(),
        }
    }
}

impl Default for SentimentAnalysis {
    fn default() -> Self {
        Self::neutral()
    }
}

/// An entity occurrence kept in the grouped entity analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    /// Entity text as it appears in the document
    pub text: String,
    /// Service confidence (0-1)
    pub confidence: f64,
}

/// Entities grouped by type label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalysis {
    /// Type label to mentions, in service order within each type
    pub entities: BTreeMap<String, Vec<EntityMention>>,
    /// Number of entities the service returned
    pub total_entities: usize,
}

/// The combined analysis object persisted on the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    /// Structured payload parsed from the model reply
    pub contract_analysis: Value,
    /// Sentiment of the document sample
    pub sentiment_analysis: SentimentAnalysis,
    /// Entities found in the document sample
    pub entity_analysis: EntityAnalysis,
}
