use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::models::{RequestOutcome, StatusKey};

/// Accumulated outcomes of a run. Latencies are stored unrounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub success: u64,
    pub failure: u64,
    pub latencies_ms: Vec<f64>,
    pub status_codes: BTreeMap<StatusKey, u64>,
}

impl AggregateStats {
    /// Number of recorded outcomes
    pub fn recorded(&self) -> u64 {
        self.success + self.failure
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    pub fn min_latency_ms(&self) -> f64 {
        self.latencies_ms
            .iter()
            .copied()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.latencies_ms
            .iter()
            .copied()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }
}

/// Thread-safe accumulator shared by every worker of a session
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<AggregateStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, status: u16, latency_ms: f64) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        stats.latencies_ms.push(latency_ms);
        stats.success += 1;
        *stats.status_codes.entry(StatusKey::Code(status)).or_insert(0) += 1;
    }

    /// Count a failure under `ERROR`. The latency is kept only if one was
    /// measured, e.g. a non-2xx response.
    pub fn record_failure(&self, latency_ms: Option<f64>) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency_ms {
            stats.latencies_ms.push(latency);
        }
        stats.failure += 1;
        *stats.status_codes.entry(StatusKey::Error).or_insert(0) += 1;
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::Success { status, latency_ms } => {
                self.record_success(*status, *latency_ms)
            }
            RequestOutcome::Failure { latency_ms, .. } => self.record_failure(*latency_ms),
        }
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = AggregateStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_successes_and_failures() {
        let stats = StatsAggregator::new();
        stats.record_success(200, 10.0);
        stats.record_success(201, 30.0);
        stats.record_failure(Some(20.0));
        stats.record_failure(None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.success, 2);
        assert_eq!(snapshot.failure, 2);
        assert_eq!(snapshot.recorded(), 4);
        assert_eq!(snapshot.latencies_ms, vec![10.0, 30.0, 20.0]);
        assert_eq!(snapshot.status_codes[&StatusKey::Code(200)], 1);
        assert_eq!(snapshot.status_codes[&StatusKey::Code(201)], 1);
        assert_eq!(snapshot.status_codes[&StatusKey::Error], 2);
        assert_eq!(snapshot.min_latency_ms(), 10.0);
        assert_eq!(snapshot.max_latency_ms(), 30.0);
        assert_eq!(snapshot.avg_latency_ms(), 20.0);
    }

    #[test]
    fn empty_stats_report_zero_latency() {
        let snapshot = StatsAggregator::new().snapshot();
        assert_eq!(snapshot.avg_latency_ms(), 0.0);
        assert_eq!(snapshot.min_latency_ms(), 0.0);
        assert_eq!(snapshot.max_latency_ms(), 0.0);
    }

    #[test]
    fn records_outcome_values() {
        let stats = StatsAggregator::new();
        stats.record(&RequestOutcome::Success {
            status: 204,
            latency_ms: 1.0,
        });
        stats.record(&RequestOutcome::Failure {
            kind: FailureKind::Status(404),
            message: "not found".to_string(),
            latency_ms: Some(2.0),
        });
        stats.record(&RequestOutcome::Failure {
            kind: FailureKind::Timeout,
            message: "timed out".to_string(),
            latency_ms: None,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.failure, 2);
        assert_eq!(snapshot.latencies_ms.len(), 2);
        assert_eq!(snapshot.status_codes[&StatusKey::Error], 2);
    }

    #[test]
    fn concurrent_recording_keeps_every_sample() {
        let stats = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for n in 0..250 {
                        if (i + n) % 2 == 0 {
                            stats.record_success(200, n as f64);
                        } else {
                            stats.record_failure(None);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.recorded(), 2000);
        assert_eq!(snapshot.status_codes.values().sum::<u64>(), 2000);
        assert_eq!(snapshot.latencies_ms.len() as u64, snapshot.success);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = StatsAggregator::new();
        stats.record_success(200, 5.0);
        stats.reset();
        assert_eq!(stats.snapshot(), AggregateStats::default());
    }
}
