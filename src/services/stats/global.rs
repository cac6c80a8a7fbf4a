//! Proxy-wide statistics

use super::counters::RequestCounters;
use super::errors::{ErrorEvent, ErrorRing};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of one forwarded request as seen by the classifier
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failure(ErrorEvent),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Debug)]
struct GlobalInner {
    totals: RequestCounters,
    recent_errors: ErrorRing,
}

/// Aggregate counters for every request the proxy forwarded
///
/// Counters and the error ring share one mutex. The in-flight gauge is an
/// atomic so entering and leaving the transport stage never contends with
/// recording.
#[derive(Debug)]
pub struct GlobalStats {
    inner: Mutex<GlobalInner>,
    in_flight: AtomicI64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self::new(super::errors::DEFAULT_ERROR_CAPACITY)
    }
}

impl GlobalStats {
    pub fn new(error_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GlobalInner {
                totals: RequestCounters::default(),
                recent_errors: ErrorRing::new(error_capacity),
            }),
            in_flight: AtomicI64::new(0),
        }
    }

    /// Mark a request as in flight until the returned guard is dropped
    pub fn begin_request(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Account for one finished request
    pub fn record(&self, outcome: Outcome, latency: Duration) {
        let mut inner = self.lock();
        inner.totals.record(outcome.is_success(), latency);
        if let Outcome::Failure(event) = outcome {
            inner.recent_errors.push(event);
        }
    }

    /// Resize the recent-error ring, dropping the oldest entries if it shrinks
    pub fn set_error_capacity(&self, capacity: usize) {
        self.lock().recent_errors.set_capacity(capacity);
    }

    pub fn error_capacity(&self) -> usize {
        self.lock().recent_errors.capacity()
    }

    /// Deep copy of every counter and the error ring
    pub fn snapshot(&self) -> GlobalSnapshot {
        let inner = self.lock();
        GlobalSnapshot {
            total_attempts: inner.totals.attempts,
            total_successes: inner.totals.successes,
            total_failures: inner.totals.failures,
            active_in_flight: self.in_flight(),
            mean_latency_micros: inner.totals.mean_latency_micros(),
            recent_errors: inner.recent_errors.to_vec(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GlobalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the in-flight gauge when dropped, on every exit path
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    stats: &'a GlobalStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time copy of [`GlobalStats`]
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSnapshot {
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub active_in_flight: i64,
    pub mean_latency_micros: u64,
    /// Newest first
    pub recent_errors: Vec<ErrorEvent>,
}

impl GlobalSnapshot {
    pub fn success_rate_percent(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_attempts as f64 * 100.0
        }
    }
}
