//! Tier Classifier
//!
//! Recomputed on every profile read. Escalation is driven by the number of
//! ledger rows for a pattern, which only ever grows, so the classification
//! behaves like a state machine without persisting any state:
//!
//! ```text
//! freq < nudge                      -> None (not surfaced)
//! freq < fossilization              -> Nudge
//! any success or resolved outcome   -> Nudge
//! interventions >= destabilize      -> Destabilize
//! interventions >= push             -> Push
//! otherwise                         -> Nudge
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TierConfig;
use crate::ledger::InterventionRecord;
use crate::types::Tier;

/// Intervention history of one pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternHistory {
    pub intervention_count: usize,
    pub success_count: usize,
    /// Any measured row came back resolved
    pub resolved: bool,
    pub last_intervention_at: Option<DateTime<Utc>>,
}

impl PatternHistory {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a InterventionRecord>) -> Self {
        let mut history = PatternHistory::default();
        for record in records {
            history.intervention_count += 1;
            if record.is_success() {
                history.success_count += 1;
            }
            if record.is_resolved == Some(true) {
                history.resolved = true;
            }
            if history.last_intervention_at.map_or(true, |t| record.created_at > t) {
                history.last_intervention_at = Some(record.created_at);
            }
        }
        history
    }

    /// A single success, ever, stops escalation
    pub fn has_improved(&self) -> bool {
        self.success_count > 0 || self.resolved
    }
}

/// Classify one pattern
pub fn classify(frequency: u8, history: &PatternHistory, config: &TierConfig, now: DateTime<Utc>) -> Tier {
    if frequency < config.nudge_threshold {
        return Tier::None;
    }
    if frequency < config.fossilization_threshold || history.has_improved() {
        return Tier::Nudge;
    }

    if history.intervention_count >= config.destabilize_interventions {
        if is_dormant(history, config, now) {
            return Tier::Nudge;
        }
        return Tier::Destabilize;
    }
    if history.intervention_count >= config.push_interventions {
        return Tier::Push;
    }
    Tier::Nudge
}

fn is_dormant(history: &PatternHistory, config: &TierConfig, now: DateTime<Utc>) -> bool {
    match (config.dormancy_reset_days, history.last_intervention_at) {
        (Some(days), Some(last)) => now - last >= Duration::days(days),
        _ => false,
    }
}
