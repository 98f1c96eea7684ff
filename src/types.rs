//! Shared types used across modules
//!
//! Error events as produced by the detection components, plus the small
//! enums (tier, trend, modality) that flow through clustering, tiering
//! and the intervention ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category label used when a detector did not supply one
pub const GENERAL_CATEGORY: &str = "general";

/// Kind of mistake a detector reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Grammar,
    Pronunciation,
    Vocabulary,
    WordOrder,
    Semantic,
    Intonation,
    Relevance,
}

impl ErrorType {
    /// Storage / pattern-key representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Grammar => "grammar",
            ErrorType::Pronunciation => "pronunciation",
            ErrorType::Vocabulary => "vocabulary",
            ErrorType::WordOrder => "word_order",
            ErrorType::Semantic => "semantic",
            ErrorType::Intonation => "intonation",
            ErrorType::Relevance => "relevance",
        }
    }

    /// Parse from the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "grammar" => Some(ErrorType::Grammar),
            "pronunciation" => Some(ErrorType::Pronunciation),
            "vocabulary" => Some(ErrorType::Vocabulary),
            "word_order" => Some(ErrorType::WordOrder),
            "semantic" => Some(ErrorType::Semantic),
            "intonation" => Some(ErrorType::Intonation),
            "relevance" => Some(ErrorType::Relevance),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel the learner produced the mistake in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Speech,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Speech => "speech",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Modality::Text),
            "speech" => Some(Modality::Speech),
            _ => None,
        }
    }
}

/// One detected mistake. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default = "new_event_id")]
    pub id: String,
    pub learner_id: String,
    pub error_type: ErrorType,
    /// Free-text sub-label, e.g. "verb_conjugation"
    #[serde(default)]
    pub category: Option<String>,
    /// The incorrect production
    pub context: String,
    #[serde(default)]
    pub correction: Option<String>,
    pub modality: Modality,
    /// Precomputed embedding, if the detector or a previous run stored one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ErrorEvent {
    /// Create a new event stamped now
    pub fn new(
        learner_id: &str,
        error_type: ErrorType,
        category: Option<&str>,
        context: &str,
        correction: Option<&str>,
        modality: Modality,
    ) -> Self {
        Self {
            id: new_event_id(),
            learner_id: learner_id.to_string(),
            error_type,
            category: category.map(|c| c.to_string()),
            context: context.to_string(),
            correction: correction.map(|c| c.to_string()),
            modality,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    /// Override the timestamp (backfills and tests)
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Category, defaulting to "general"
    pub fn category_label(&self) -> &str {
        match self.category.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => GENERAL_CATEGORY,
        }
    }

    /// Text fed to the embedding provider: context followed by correction
    pub fn embedding_text(&self) -> String {
        match self.correction.as_deref() {
            Some(correction) if !correction.is_empty() => {
                format!("{} {}", self.context, correction)
            }
            _ => self.context.clone(),
        }
    }
}

/// Pattern key for an error type and category, e.g. "grammar|verb_conjugation"
pub fn pattern_key(error_type: ErrorType, category: &str) -> String {
    format!("{}|{}", error_type.as_str(), category)
}

/// Escalation level of intervention aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Not surfaced
    None,
    Nudge,
    Push,
    Destabilize,
}

impl Tier {
    pub fn level(&self) -> u8 {
        match self {
            Tier::None => 0,
            Tier::Nudge => 1,
            Tier::Push => 2,
            Tier::Destabilize => 3,
        }
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Tier::None),
            1 => Some(Tier::Nudge),
            2 => Some(Tier::Push),
            3 => Some(Tier::Destabilize),
            _ => None,
        }
    }

    /// Tier 2 and above
    pub fn is_fossilizing(&self) -> bool {
        *self >= Tier::Push
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::None => write!(f, "none"),
            Tier::Nudge => write!(f, "nudge"),
            Tier::Push => write!(f, "push"),
            Tier::Destabilize => write!(f, "destabilize"),
        }
    }
}

/// Week-over-week direction of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Worsening => write!(f, "worsening"),
        }
    }
}

/// Dominant channel of a pattern's members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryModality {
    Speech,
    Text,
    Mixed,
}

impl PrimaryModality {
    /// Speech or text wins only with a 3:1 majority
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ErrorEvent>) -> Self {
        let (mut speech, mut text) = (0usize, 0usize);
        for event in events {
            match event.modality {
                Modality::Speech => speech += 1,
                Modality::Text => text += 1,
            }
        }
        if speech > text * 3 {
            PrimaryModality::Speech
        } else if text > speech * 3 {
            PrimaryModality::Text
        } else {
            PrimaryModality::Mixed
        }
    }
}

impl std::fmt::Display for PrimaryModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryModality::Speech => write!(f, "speech"),
            PrimaryModality::Text => write!(f, "text"),
            PrimaryModality::Mixed => write!(f, "mixed"),
        }
    }
}

/// An incorrect production and its correction, if one was known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub incorrect: String,
    pub correct: Option<String>,
}
