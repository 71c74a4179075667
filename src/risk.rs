//! Risk scoring.
//!
//! Combines the counts of findings in the model's structured analysis with
//! the negative-sentiment fraction into one score in `[0, 100]`. Scoring never
//! fails: malformed input yields [`FALLBACK_SCORE`].

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::SentimentScores;

/// Score returned when the inputs cannot be interpreted.
pub const FALLBACK_SCORE: f64 = 50.0;

/// Upper bound of the score.
pub const MAX_SCORE: f64 = 100.0;

/// Points per entry of each list field of the analysis.
pub const FIELD_WEIGHTS: [(&str, f64); 4] = [
    ("risks", 10.0),
    ("missing_clauses", 5.0),
    ("unusual_provisions", 7.0),
    ("compliance_issues", 15.0),
];

/// Points for a fully negative sentiment distribution.
pub const NEGATIVE_SENTIMENT_WEIGHT: f64 = 20.0;

#[derive(Debug, Error, PartialEq)]
enum ScoringError {
    #[error("analysis payload is not an object")]
    NotAnObject,
    #[error("field `{0}` is not a list")]
    NotAList(&'static str),
    #[error("negative sentiment score {0} is not a finite number")]
    BadSentiment(f64),
}

/// Risk score for an analysis payload and its sentiment distribution.
#[must_use]
pub fn score(analysis: &Value, sentiment: &SentimentScores) -> f64 {
    match try_score(analysis, sentiment) {
        Ok(score) => score,
        Err(err) => {
            warn!(error = %err, "Risk score calculation failed, using fallback");
            FALLBACK_SCORE
        }
    }
}

fn try_score(analysis: &Value, sentiment: &SentimentScores) -> Result<f64, ScoringError> {
    let fields = analysis.as_object().ok_or(ScoringError::NotAnObject)?;

    let mut total = 0.0;
    for (field, weight) in FIELD_WEIGHTS {
        let count = match fields.get(field) {
            None | Some(Value::Null) => 0,
            Some(Value::Array(items)) => items.len(),
            Some(_) => return Err(ScoringError::NotAList(field)),
        };
        #[allow(clippy::cast_precision_loss)]
        let count = count as f64;
        total += count * weight;
    }

    if !sentiment.negative.is_finite() {
        return Err(ScoringError::BadSentiment(sentiment.negative));
    }
    total += sentiment.negative * NEGATIVE_SENTIMENT_WEIGHT;

    Ok(round2(total.clamp(0.0, MAX_SCORE)))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
