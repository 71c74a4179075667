//! AI analysis stage.
//!
//! Sends the extracted text to the language model, enriches the reply with
//! sentiment and entities, scores the risk and persists everything in one
//! update. Only the model call and the final write are hard failures; the
//! other sub-steps degrade to defaults.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::error::{PlatformError, Result};
use crate::extraction::ExtractionOutcome;
use crate::lifecycle::ContractStatus;
use crate::logging::OperationTimer;
use crate::metrics::PipelineMetrics;
use crate::models::{AnalysisResults, ContractAnalysis, EntityAnalysis, EntityMention, SentimentAnalysis};
use crate::repository::{ContractStore, ContractUpdate};
use crate::risk;
use crate::services::{AnalysisService, LanguageService, PipelineServices};
use crate::status::StatusTracker;
use crate::utils::truncate_chars;

const STAGE: &str = "ai_analysis";

const PROMPT_TEMPLATE: &str = r#"Analyze the following contract text and provide a comprehensive analysis. Focus on:
1. Key terms and conditions
2. Potential risks and liabilities
3. Missing standard clauses
4. Unusual or concerning provisions
5. Compliance and regulatory considerations

Provide your analysis in the following JSON format:
{
    "key_terms": ["list of key terms and conditions"],
    "risks": ["list of identified risks"],
    "missing_clauses": ["list of standard clauses that appear to be missing"],
    "unusual_provisions": ["list of unusual or concerning provisions"],
    "compliance_issues": ["list of potential compliance issues"],
    "recommendations": ["list of recommendations for improvement"],
    "summary": "Brief summary of the contract analysis"
}

Contract text:
"#;

/// Input handed to the stage by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInput {
    /// Contract to analyze
    pub contract_id: Uuid,
    /// Full extracted text; the stage truncates it per consumer
    pub extracted_text: String,
}

impl From<&ExtractionOutcome> for AnalysisInput {
    fn from(outcome: &ExtractionOutcome) -> Self {
        Self {
            contract_id: outcome.contract_id,
            extracted_text: outcome.extracted_text.clone(),
        }
    }
}

/// Stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    /// Contract the analysis belongs to
    pub contract_id: Uuid,
    /// Model output, sentiment and grouped entities
    pub analysis_results: AnalysisResults,
    /// Score in `[0, 100]`
    pub risk_score: f64,
    /// `key_terms` from the model output
    pub key_terms: Vec<String>,
    /// `missing_clauses` from the model output
    pub missing_clauses: Vec<String>,
    /// Always `analysis_completed`
    pub status: ContractStatus,
}

/// Build the model prompt around the first `max_chars` characters of `text`.
#[must_use]
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    let mut prompt = String::with_capacity(PROMPT_TEMPLATE.len() + max_chars.min(text.len()));
    prompt.push_str(PROMPT_TEMPLATE);
    prompt.push_str(truncate_chars(text, max_chars));
    prompt
}

/// Interpret the span between the first `{` and the last `}` of a model reply.
///
/// Anything unusable becomes the empty-lists structure with the raw reply
/// as its summary.
#[must_use]
pub fn parse_model_reply(reply: &str) -> Value {
    let span = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return fallback_payload(reply),
    };

    match serde_json::from_str::<Value>(span) {
        Ok(payload @ Value::Object(_)) => payload,
        Ok(_) => {
            warn!("Model reply JSON span is not an object, using raw reply as summary");
            fallback_payload(reply)
        }
        Err(err) => {
            warn!(error = %err, "Model reply JSON span failed to parse, using raw reply as summary");
            fallback_payload(reply)
        }
    }
}

fn fallback_payload(reply: &str) -> Value {
    serde_json::to_value(ContractAnalysis::fallback(reply)).unwrap_or_default()
}

/// Strings of a list field; anything else yields an empty list.
#[must_use]
pub fn string_list(payload: &Value, field: &str) -> Vec<String> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// The AI analysis stage.
pub struct AnalysisStage {
    store: Arc<dyn ContractStore>,
    analyzer: Arc<dyn AnalysisService>,
    language: Arc<dyn LanguageService>,
    tracker: StatusTracker,
    config: AnalysisConfig,
    metrics: PipelineMetrics,
}

impl AnalysisStage {
    /// Stage over the shared service handles.
    pub fn new(services: &PipelineServices, config: AnalysisConfig) -> Self {
        Self {
            store: services.store.clone(),
            analyzer: services.analyzer.clone(),
            language: services.language.clone(),
            tracker: StatusTracker::new(services.store.clone()),
            config,
            metrics: PipelineMetrics::default(),
        }
    }

    /// Run the stage for one contract.
    pub async fn run(&self, input: &AnalysisInput, request_id: &str) -> Result<AnalysisOutcome> {
        let span = info_span!("ai_analysis", contract_id = %input.contract_id, request_id);
        self.run_inner(input).instrument(span).await
    }

    async fn run_inner(&self, input: &AnalysisInput) -> Result<AnalysisOutcome> {
        let timer = OperationTimer::new(STAGE);
        info!(text_chars = input.extracted_text.chars().count(), "Starting AI analysis");

        self.tracker
            .begin(input.contract_id, ContractStatus::ProcessingAiAnalysis)
            .await?;

        match self.analyze_and_store(input).await {
            Ok(outcome) => {
                self.metrics.record_stage(STAGE, timer.finish(), true);
                info!(risk_score = outcome.risk_score, "AI analysis completed successfully");
                Ok(outcome)
            }
            Err(err) => {
                self.metrics.record_stage(STAGE, timer.elapsed(), false);
                error!(error = %err, code = err.code(), "AI analysis failed");
                self.tracker
                    .set_status(input.contract_id, ContractStatus::AiAnalysisFailed)
                    .await;
                Err(err)
            }
        }
    }

    async fn analyze_and_store(&self, input: &AnalysisInput) -> Result<AnalysisOutcome> {
        let prompt = build_prompt(&input.extracted_text, self.config.max_prompt_chars);
        let reply = self
            .analyzer
            .invoke(&prompt)
            .await
            .map_err(|err| PlatformError::analysis("Failed to analyze contract", &err))?;
        let contract_analysis = parse_model_reply(&reply);

        let sample = truncate_chars(&input.extracted_text, self.config.language_sample_chars);
        let sentiment_analysis = self.sentiment(sample).await;
        let entity_analysis = self.entities(sample).await;

        let risk_score = risk::score(&contract_analysis, &sentiment_analysis.sentiment_scores);
        self.metrics.record_risk_score(risk_score);

        let key_terms = string_list(&contract_analysis, "key_terms");
        let missing_clauses = string_list(&contract_analysis, "missing_clauses");
        let analysis_results = AnalysisResults {
            contract_analysis,
            sentiment_analysis,
            entity_analysis,
        };

        let update = ContractUpdate {
            analysis_results: Some(analysis_results.clone()),
            risk_score: Some(risk_score),
            key_terms: Some(key_terms.clone()),
            missing_clauses: Some(missing_clauses.clone()),
            ..ContractUpdate::status(ContractStatus::AnalysisCompleted, Utc::now())
        }
        .when_status(ContractStatus::ProcessingAiAnalysis);
        self.store
            .update(input.contract_id, &update)
            .await
            .map_err(|err| PlatformError::Persistence(format!("Failed to update contract analysis: {err:#}")))?;
        self.metrics.record_transition(ContractStatus::AnalysisCompleted);

        Ok(AnalysisOutcome {
            contract_id: input.contract_id,
            analysis_results,
            risk_score,
            key_terms,
            missing_clauses,
            status: ContractStatus::AnalysisCompleted,
        })
    }

    async fn sentiment(&self, sample: &str) -> SentimentAnalysis {
        match self
            .language
            .detect_sentiment(sample, &self.config.language_code)
            .await
        {
            Ok(sentiment) => sentiment,
            Err(err) => {
                warn!(error = %err, "Sentiment analysis failed, using neutral default");
                self.metrics.record_degraded("sentiment");
                SentimentAnalysis::neutral()
            }
        }
    }

    async fn entities(&self, sample: &str) -> EntityAnalysis {
        match self
            .language
            .detect_entities(sample, &self.config.language_code)
            .await
        {
            Ok(detected) => {
                let total_entities = detected.len();
                let mut entities: BTreeMap<String, Vec<EntityMention>> = BTreeMap::new();
                for entity in detected {
                    entities.entry(entity.entity_type).or_default().push(EntityMention {
                        text: entity.text,
                        confidence: entity.score,
                    });
                }
                EntityAnalysis {
                    entities,
                    total_entities,
                }
            }
            Err(err) => {
                warn!(error = %err, "Entity extraction failed, using empty grouping");
                self.metrics.record_degraded("entities");
                EntityAnalysis::default()
            }
        }
    }
}
