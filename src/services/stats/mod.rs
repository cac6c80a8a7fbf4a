//! Request statistics
//!
//! Proxy-wide counters with the bounded recent-error ring, and the counter
//! type each API key carries for its own totals.
//!
//! # Locking
//! The global counters sit behind one mutex and each key's counters behind
//! that key's own mutex. [`record_outcome`] takes them one after the other,
//! never both at once.

mod counters;
mod errors;
mod global;

pub use counters::RequestCounters;
pub use errors::{
    extract_model, ErrorEvent, ErrorKind, ErrorRing, ErrorStage, DEFAULT_ERROR_CAPACITY,
    NO_KEY_ID, UNKNOWN_MODEL,
};
pub use global::{GlobalSnapshot, GlobalStats, InFlightGuard, Outcome};

use crate::services::key_pool::ApiKey;
use std::time::Duration;

/// Record one classified request against the global totals and, when a key
/// was attached, against that key
pub fn record_outcome(
    global: &GlobalStats,
    key: Option<&ApiKey>,
    outcome: Outcome,
    latency: Duration,
) {
    let success = outcome.is_success();
    global.record(outcome, latency);
    if let Some(key) = key {
        key.record(success, latency);
    }
}
