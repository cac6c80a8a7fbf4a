//! Request counters shared by the per-key and proxy-wide statistics

use serde::Serialize;
use std::time::Duration;

/// Attempt/success/failure counts plus cumulative latency
///
/// Latency is accumulated in whole microseconds and the mean is derived on
/// demand, so long uptimes never accumulate floating-point drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_micros: u64,
}

impl RequestCounters {
    /// Account for one finished request
    pub fn record(&mut self, success: bool, latency: Duration) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_latency_micros = self
            .total_latency_micros
            .saturating_add(duration_micros(latency));
    }

    /// Mean latency in microseconds, 0 before the first request
    pub fn mean_latency_micros(&self) -> u64 {
        if self.attempts == 0 {
            0
        } else {
            self.total_latency_micros / self.attempts
        }
    }

    /// Success rate as a percentage, 0.0 before the first request
    pub fn success_rate_percent(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64 * 100.0
        }
    }
}

fn duration_micros(latency: Duration) -> u64 {
    u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)
}
