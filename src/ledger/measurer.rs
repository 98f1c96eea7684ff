//! Outcome Measurer
//!
//! Lazily closes out ledger rows older than the measurement window. Runs
//! alongside profile reads; skipping a run only leaves rows unmeasured until
//! the next one.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{InterventionLedger, InterventionOutcome, InterventionRecord};

pub struct OutcomeMeasurer {
    ledger: InterventionLedger,
    window: Duration,
    nudge_threshold: u8,
}

impl OutcomeMeasurer {
    pub fn new(ledger: InterventionLedger, window_days: i64, nudge_threshold: u8) -> Self {
        Self {
            ledger,
            window: Duration::days(window_days),
            nudge_threshold,
        }
    }

    /// Rows due for measurement: unmeasured and at least one window old
    pub fn due<'a>(&self, records: &'a [InterventionRecord], now: DateTime<Utc>) -> Vec<&'a InterventionRecord> {
        let cutoff = now - self.window;
        records
            .iter()
            .filter(|r| !r.is_measured() && r.created_at <= cutoff)
            .collect()
    }

    /// Close out every due row using `frequency_of` for the pattern's current
    /// frequency. Returns the number of rows that changed.
    ///
    /// Rows whose frequency cannot be determined right now (`None`) stay open
    /// for a later pass. Per-row failures are logged and skipped; a row
    /// measured concurrently by another caller is left alone.
    pub async fn measure<F>(&self, records: &[InterventionRecord], frequency_of: F, now: DateTime<Utc>) -> usize
    where
        F: Fn(&InterventionRecord) -> Option<u8>,
    {
        let due = self.due(records, now);
        if due.is_empty() {
            return 0;
        }

        let mut measured = 0;
        for record in due {
            let Some(frequency) = frequency_of(record) else {
                debug!("Deferring measurement of {} ({})", record.id, record.pattern_key);
                continue;
            };
            let outcome = InterventionOutcome {
                frequency_after_window: frequency,
                is_resolved: frequency < self.nudge_threshold,
                measured_at: now,
            };
            match self.ledger.close_out(&record.id, &outcome).await {
                Ok(true) => measured += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to measure intervention {}: {}", record.id, e),
            }
        }

        if measured > 0 {
            info!("Measured {} intervention outcomes", measured);
        }
        measured
    }
}
