//! Trend & frequency analysis

use chrono::{DateTime, Duration, Utc};

use crate::config::TierConfig;
use crate::types::{ErrorEvent, Trend};

/// Share of the learner's errors, 0-100, rounded to the nearest integer
pub fn frequency(count: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (count.min(total) as f64 / total as f64) * 100.0;
    pct.round() as u8
}

/// Compare the most recent window against the one before it.
///
/// An empty previous window gives `Stable`: there is nothing to compare against.
pub fn compute_trend<'a>(
    events: impl IntoIterator<Item = &'a ErrorEvent>,
    now: DateTime<Utc>,
    config: &TierConfig,
) -> Trend {
    let window = Duration::days(config.trend_window_days);
    let current_start = now - window;
    let previous_start = current_start - window;

    let (mut current, mut previous) = (0usize, 0usize);
    for event in events {
        if event.created_at >= current_start {
            current += 1;
        } else if event.created_at >= previous_start {
            previous += 1;
        }
    }

    if previous == 0 {
        return Trend::Stable;
    }

    let ratio = current as f64 / previous as f64;
    if ratio < config.improving_ratio {
        Trend::Improving
    } else if ratio > config.worsening_ratio {
        Trend::Worsening
    } else {
        Trend::Stable
    }
}
