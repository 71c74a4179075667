use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use stop_words::{get, LANGUAGE};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use whatlang::{detect, Lang};

use crate::models::{SentimentAnalysis, SentimentScores};
use crate::services::{DetectedEntity, LanguageService};

/// Contract vocabulary that reads favourably to the signing party
const POSITIVE_TERMS: [(&str, f64); 20] = [
    ("agree", 0.8),
    ("agreed", 0.8),
    ("mutual", 1.2),
    ("mutually", 1.2),
    ("benefit", 1.2),
    ("benefits", 1.2),
    ("fair", 1.2),
    ("reasonable", 1.0),
    ("protect", 1.0),
    ("protection", 1.0),
    ("guarantee", 1.2),
    ("guaranteed", 1.2),
    ("secure", 1.0),
    ("cooperate", 1.0),
    ("satisfaction", 1.2),
    ("bonus", 1.5),
    ("discount", 1.2),
    ("refund", 1.0),
    ("renew", 0.6),
    ("support", 0.8),
];

/// Contract vocabulary that signals exposure or conflict
const NEGATIVE_TERMS: [(&str, f64); 24] = [
    ("penalty", -1.5),
    ("penalties", -1.5),
    ("breach", -1.5),
    ("default", -1.2),
    ("terminate", -1.0),
    ("termination", -1.0),
    ("liability", -1.2),
    ("liable", -1.2),
    ("damages", -1.5),
    ("forfeit", -1.8),
    ("forfeiture", -1.8),
    ("dispute", -1.2),
    ("litigation", -1.8),
    ("unlimited", -1.5),
    ("irrevocable", -1.2),
    ("waive", -1.0),
    ("waiver", -1.0),
    ("void", -1.2),
    ("overdue", -1.2),
    ("late", -0.8),
    ("fail", -1.2),
    ("failure", -1.2),
    ("indemnify", -1.0),
    ("exclusive", -0.6),
];

/// Intensifiers that modify sentiment
const INTENSIFIERS: [(&str, f64); 8] = [
    ("fully", 1.5),
    ("solely", 1.5),
    ("entirely", 1.8),
    ("immediately", 1.5),
    ("substantially", 1.3),
    ("materially", 1.3),
    ("partially", 0.7),
    ("reasonably", 0.8),
];

/// Negation words that flip sentiment
const NEGATIONS: [&str; 8] = ["not", "no", "never", "none", "neither", "nor", "without", "cannot"];

/// Sentence score beyond which a sentence is labelled polar
const POLARITY_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentenceLabel {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

/// Rule-based sentiment and entity detection for contract text
pub struct NlpProcessor {
    url_regex: Regex,
    special_chars_regex: Regex,
    extra_spaces_regex: Regex,
    sentence_regex: Regex,
    entity_rules: Vec<EntityRule>,
    stopwords: HashSet<String>,
}

struct EntityRule {
    entity_type: &'static str,
    pattern: Regex,
    confidence: f64,
}

impl NlpProcessor {
    /// Create a new NLP processor
    pub fn new() -> Result<Self> {
        let url_regex = Regex::new(r"https?://\S+|www\.\S+")
            .map_err(|e| anyhow::anyhow!("Failed to compile URL regex: {e}"))?;
        let special_chars_regex = Regex::new(r"[^\w\s]")
            .map_err(|e| anyhow::anyhow!("Failed to compile special chars regex: {e}"))?;
        let extra_spaces_regex = Regex::new(r"\s+")
            .map_err(|e| anyhow::anyhow!("Failed to compile spaces regex: {e}"))?;
        let sentence_regex = Regex::new(r"[^.!?;\n]+[.!?;]?")
            .map_err(|e| anyhow::anyhow!("Failed to compile sentence regex: {e}"))?;

        let rules = [
            (
                "DATE",
                r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}\b|\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b",
                0.95,
            ),
            (
                "QUANTITY",
                r"(?:[$€£]\s?\d[\d,]*(?:\.\d+)?|\b(?:USD|EUR|GBP)\s?\d[\d,]*(?:\.\d+)?|\b\d+(?:\.\d+)?\s?%|\b\d+\s+(?:days?|months?|years?|business days)\b)",
                0.9,
            ),
            (
                "ORGANIZATION",
                r"\b(?:[A-Z][\w&'-]*\s+){0,4}[A-Z][\w&'-]*,?\s+(?:Inc|LLC|Ltd|Corp|Corporation|Company|GmbH|LLP|plc)\b\.?",
                0.85,
            ),
            ("PERSON", r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?", 0.8),
            (
                "TITLE",
                r"\b(?:Chief [A-Z][a-z]+ Officer|CEO|CFO|CTO|COO|General Counsel|President|Director)\b",
                0.7,
            ),
        ];
        let entity_rules = rules
            .into_iter()
            .map(|(entity_type, pattern, confidence)| {
                Regex::new(pattern)
                    .map(|pattern| EntityRule {
                        entity_type,
                        pattern,
                        confidence,
                    })
                    .map_err(|e| anyhow::anyhow!("Failed to compile {entity_type} regex: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;

        // Initialize stopwords for English
        let stopwords: HashSet<String> = get(LANGUAGE::English)
            .iter()
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            url_regex,
            special_chars_regex,
            extra_spaces_regex,
            sentence_regex,
            entity_rules,
            stopwords,
        })
    }

    /// Clean the text by removing URLs and punctuation and normalizing whitespace
    #[must_use]
    pub fn clean_text(&self, text: &str) -> String {
        let normalized = text.nfc().collect::<String>();
        let no_urls = self.url_regex.replace_all(&normalized, " ");
        let no_special = self.special_chars_regex.replace_all(&no_urls, " ");
        let normalized_spaces = self.extra_spaces_regex.replace_all(&no_special, " ");
        normalized_spaces.trim().to_lowercase()
    }

    /// Tokenize cleaned text into content words
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(ToString::to_string)
            .filter(|s| !s.is_empty() && !self.stopwords.contains(s))
            .collect()
    }

    /// Sentiment distribution over the sentences of `text`
    #[must_use]
    pub fn sentiment(&self, text: &str) -> SentimentAnalysis {
        let mut counts = [0_u32; 4];
        for sentence in self.sentence_regex.find_iter(text) {
            let cleaned = self.clean_text(sentence.as_str());
            if self.tokenize(&cleaned).is_empty() {
                continue;
            }
            let index = match classify_sentence(&cleaned) {
                SentenceLabel::Positive => 0,
                SentenceLabel::Negative => 1,
                SentenceLabel::Neutral => 2,
                SentenceLabel::Mixed => 3,
            };
            counts[index] += 1;
        }

        let total: u32 = counts.iter().sum();
        if total == 0 {
            return SentimentAnalysis::neutral();
        }

        let fraction = |count: u32| f64::from(count) / f64::from(total);
        let sentiment_scores = SentimentScores {
            positive: fraction(counts[0]),
            negative: fraction(counts[1]),
            neutral: fraction(counts[2]),
            mixed: fraction(counts[3]),
        };

        // Ties resolve to the earlier label in this order
        let labels = ["NEUTRAL", "NEGATIVE", "POSITIVE", "MIXED"];
        let ordered = [counts[2], counts[1], counts[0], counts[3]];
        let mut best = 0;
        for (index, count) in ordered.iter().enumerate() {
            if *count > ordered[best] {
                best = index;
            }
        }

        SentimentAnalysis {
            sentiment: labels[best].to_string(),
            sentiment_scores,
        }
    }

    /// Rule-based entity detection, in order of appearance
    #[must_use]
    pub fn entities(&self, text: &str) -> Vec<DetectedEntity> {
        let mut found: Vec<(usize, DetectedEntity)> = Vec::new();
        for rule in &self.entity_rules {
            for m in rule.pattern.find_iter(text) {
                found.push((
                    m.start(),
                    DetectedEntity {
                        text: m.as_str().trim().to_string(),
                        entity_type: rule.entity_type.to_string(),
                        score: rule.confidence,
                    },
                ));
            }
        }
        found.sort_by_key(|(start, _)| *start);
        found.into_iter().map(|(_, entity)| entity).collect()
    }

    fn check_language(text: &str, language_code: &str) {
        if language_code != "en" {
            warn!(%language_code, "Lexicon covers English only");
        }
        if let Some(info) = detect(text) {
            if info.lang() != Lang::Eng && info.confidence() > 0.5 {
                warn!(
                    detected = info.lang().code(),
                    confidence = info.confidence(),
                    "Text does not look like English, results may be unreliable"
                );
            } else {
                debug!(detected = info.lang().code(), "Detected document language");
            }
        }
    }
}

/// Weighted lexicon score of one cleaned sentence
fn classify_sentence(cleaned: &str) -> SentenceLabel {
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let mut total = 0.0;
    let mut positive_hits = 0;
    let mut negative_hits = 0;

    for (i, word) in words.iter().enumerate() {
        let weight = POSITIVE_TERMS
            .iter()
            .chain(NEGATIVE_TERMS.iter())
            .find(|(term, _)| term == word)
            .map(|(_, weight)| *weight);
        let Some(mut sentiment) = weight else {
            continue;
        };

        if i > 0 {
            if let Some((_, intensity)) = INTENSIFIERS.iter().find(|(w, _)| *w == words[i - 1]) {
                sentiment *= *intensity;
            }
        }

        let has_negation = (i >= 1 && NEGATIONS.contains(&words[i - 1]))
            || (i >= 2 && NEGATIONS.contains(&words[i - 2]));
        if has_negation {
            sentiment = -sentiment * 0.8; // Flip and reduce intensity
        }

        if sentiment > 0.0 {
            positive_hits += 1;
        } else {
            negative_hits += 1;
        }
        total += sentiment;
    }

    let hits = positive_hits + negative_hits;
    if hits == 0 {
        return SentenceLabel::Neutral;
    }

    let score = (total / f64::from(hits)).clamp(-1.0, 1.0);
    if positive_hits > 0 && negative_hits > 0 && score.abs() <= POLARITY_THRESHOLD {
        SentenceLabel::Mixed
    } else if score > POLARITY_THRESHOLD {
        SentenceLabel::Positive
    } else if score < -POLARITY_THRESHOLD {
        SentenceLabel::Negative
    } else {
        SentenceLabel::Neutral
    }
}

#[async_trait]
impl LanguageService for NlpProcessor {
    async fn detect_sentiment(&self, text: &str, language_code: &str) -> Result<SentimentAnalysis> {
        Self::check_language(text, language_code);
        Ok(self.sentiment(text))
    }

    async fn detect_entities(&self, text: &str, language_code: &str) -> Result<Vec<DetectedEntity>> {
        Self::check_language(text, language_code);
        Ok(self.entities(text))
    }
}
