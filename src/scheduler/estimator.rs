use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Running average of observed burst time for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoricalRecord {
    pub average: Duration,
    pub samples: u64,
}

/// Burst-time history keyed by exact command text.
///
/// Lives only as long as the engine that owns it.
#[derive(Debug)]
pub struct HistoricalEstimator {
    records: HashMap<String, HistoricalRecord>,
    fallback: Duration,
}

impl HistoricalEstimator {
    pub fn new(fallback: Duration) -> Self {
        Self {
            records: HashMap::new(),
            fallback,
        }
    }

    /// Average observed burst, or the fallback for unseen commands.
    pub fn estimate(&self, command: &str) -> Duration {
        self.records
            .get(command)
            .map(|r| r.average)
            .unwrap_or(self.fallback)
    }

    /// Fold one successful run into the average.
    pub fn record(&mut self, command: &str, observed: Duration) {
        match self.records.get_mut(command) {
            Some(rec) => {
                let total = rec.average.as_nanos() * rec.samples as u128 + observed.as_nanos();
                let avg = total / (rec.samples as u128 + 1);
                rec.average = Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX));
                rec.samples += 1;
            }
            None => {
                self.records.insert(
                    command.to_string(),
                    HistoricalRecord {
                        average: observed,
                        samples: 1,
                    },
                );
            }
        }
        tracing::debug!(command, observed_ms = observed.as_millis() as u64, "Burst history updated");
    }

    /// Starting MLFQ tier for a command.
    ///
    /// A command with history goes to the first tier whose quantum covers its
    /// average, or the lowest tier. An unseen command starts in the middle
    /// tier (tier 1, or tier 0 when there is only one).
    pub fn classify(&self, command: &str, quanta: &[Duration]) -> usize {
        let lowest = quanta.len().saturating_sub(1);
        match self.records.get(command) {
            None => lowest.min(1),
            Some(rec) => quanta
                .iter()
                .position(|q| rec.average <= *q)
                .unwrap_or(lowest),
        }
    }

    pub fn get(&self, command: &str) -> Option<&HistoricalRecord> {
        self.records.get(command)
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn unseen_command_uses_fallback() {
        let est = HistoricalEstimator::new(ms(1000));
        assert_eq!(est.estimate("ls"), ms(1000));
        assert!(est.get("ls").is_none());
    }

    #[test]
    fn single_sample_is_the_estimate() {
        let mut est = HistoricalEstimator::new(ms(1000));
        est.record("ls", ms(42));
        assert_eq!(est.estimate("ls"), ms(42));
        assert_eq!(est.get("ls").unwrap().samples, 1);
    }

    #[test]
    fn two_samples_average() {
        let mut est = HistoricalEstimator::new(ms(1000));
        est.record("make", ms(100));
        est.record("make", ms(300));
        assert_eq!(est.estimate("make"), ms(200));
        assert_eq!(est.get("make").unwrap().samples, 2);
    }

    #[test]
    fn cumulative_average_over_many_samples() {
        let mut est = HistoricalEstimator::new(ms(1000));
        for v in [10, 20, 30, 40] {
            est.record("job", ms(v));
        }
        assert_eq!(est.estimate("job"), ms(25));
    }

    #[test]
    fn keys_are_exact_command_text() {
        let mut est = HistoricalEstimator::new(ms(1000));
        est.record("sleep 1", ms(400));
        assert_eq!(est.estimate("sleep  1"), ms(1000));
        est.record("sleep 1", ms(500));
        assert_eq!(est.estimate("sleep 1"), ms(450));
        assert_eq!(est.len(), 1);
    }

    #[test]
    fn classify_against_tier_quanta() {
        let quanta = [ms(50), ms(100), ms(200)];
        let mut est = HistoricalEstimator::new(ms(1000));

        // Unseen commands start in the middle tier, whatever the fallback
        assert_eq!(est.classify("new", &quanta), 1);
        assert_eq!(est.classify("new", &[ms(50)]), 0);

        est.record("short", ms(30));
        est.record("medium", ms(100));
        est.record("long", ms(150));
        assert_eq!(est.classify("short", &quanta), 0);
        assert_eq!(est.classify("medium", &quanta), 1);
        assert_eq!(est.classify("long", &quanta), 2);
    }
}
