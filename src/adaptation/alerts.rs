//! Fossilization alerts for tutor prompts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use super::profile::AdaptationProfile;
use crate::types::{PrimaryModality, Tier};

/// Alerts per profile, to keep prompts short
pub const MAX_ALERTS: usize = 3;
/// Example pairs per alert
pub const MAX_ALERT_EXAMPLES: usize = 2;

/// A complete incorrect/correct pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertExample {
    pub incorrect: String,
    pub correct: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FossilizationAlert {
    /// "error_type: category"
    pub pattern: String,
    pub tier: Tier,
    pub examples: Vec<AlertExample>,
    pub primary_modality: PrimaryModality,
    /// Relative time, e.g. "3 days ago"
    pub last_occurred: String,
}

pub fn build_fossilization_alerts(profile: &AdaptationProfile) -> Vec<FossilizationAlert> {
    build_fossilization_alerts_at(profile, Utc::now())
}

/// Top tier-2+ patterns with up to two complete example pairs each.
///
/// Pure over the profile; `now` only feeds the relative time strings.
pub fn build_fossilization_alerts_at(profile: &AdaptationProfile, now: DateTime<Utc>) -> Vec<FossilizationAlert> {
    profile
        .fossilizing_patterns
        .iter()
        .filter(|p| p.tier.is_fossilizing())
        .take(MAX_ALERTS)
        .map(|p| FossilizationAlert {
            pattern: format!("{}: {}", p.error_type, p.category),
            tier: p.tier,
            examples: p
                .examples
                .iter()
                .filter_map(|e| match e.correct.as_deref() {
                    Some(correct) if !e.incorrect.is_empty() && !correct.is_empty() => Some(AlertExample {
                        incorrect: e.incorrect.clone(),
                        correct: correct.to_string(),
                    }),
                    _ => None,
                })
                .take(MAX_ALERT_EXAMPLES)
                .collect(),
            primary_modality: p.primary_modality,
            last_occurred: format_relative_time(p.last_occurred, now),
        })
        .collect()
}

pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - then).num_days().max(0);
    match days {
        0 => "today".to_string(),
        1 => "1 day ago".to_string(),
        2..=6 => format!("{} days ago", days),
        _ => match days / 7 {
            1 => "1 week ago".to_string(),
            weeks => format!("{} weeks ago", weeks),
        },
    }
}

/// Render alerts as a prompt section; empty string when there are none
pub fn render_alerts(alerts: &[FossilizationAlert]) -> String {
    if alerts.is_empty() {
        return String::new();
    }

    let mut out = String::from("FOSSILIZATION ALERTS (persistent error patterns, address them deliberately):\n");
    for alert in alerts {
        let _ = writeln!(
            out,
            "- {} [tier {}, {}, mostly {}, last seen {}]",
            alert.pattern,
            alert.tier.level(),
            alert.tier,
            alert.primary_modality,
            alert.last_occurred
        );
        for example in &alert.examples {
            let _ = writeln!(out, "    \"{}\" -> \"{}\"", example.incorrect, example.correct);
        }
    }
    out
}
