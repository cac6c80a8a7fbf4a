//! API key type and its runtime state
//!
//! Each key owns one mutex covering its status and counters, independent of
//! the pool's cursor lock.

use crate::services::stats::RequestCounters;
use crate::utils::mask_key;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// Key Status
// ============================================================================

/// Whether a key takes part in rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum KeyStatus {
    #[default]
    Active,
    Disabled,
}

impl KeyStatus {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Active
        } else {
            Self::Disabled
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Active
    }

    /// Label shown by dashboards
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// API Key
// ============================================================================

#[derive(Debug, Default)]
struct KeyState {
    status: KeyStatus,
    counters: RequestCounters,
}

/// One upstream API key
pub struct ApiKey {
    /// The secret sent upstream
    secret: String,
    /// Masked form, safe for logs and UIs
    display_id: String,
    state: Mutex<KeyState>,
}

impl ApiKey {
    /// Create an enabled key with zeroed counters
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let display_id = mask_key(&secret);
        Self {
            secret,
            display_id,
            state: Mutex::new(KeyState::default()),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn display_id(&self) -> &str {
        &self.display_id
    }

    pub fn status(&self) -> KeyStatus {
        self.state().status
    }

    pub fn is_enabled(&self) -> bool {
        self.status().is_enabled()
    }

    /// Set the status, returning the previous one
    pub(super) fn set_status(&self, status: KeyStatus) -> KeyStatus {
        std::mem::replace(&mut self.state().status, status)
    }

    /// Flip the status, returning the new one
    pub(super) fn flip_status(&self) -> KeyStatus {
        let mut state = self.state();
        state.status = KeyStatus::from_enabled(!state.status.is_enabled());
        state.status
    }

    /// Account for one finished request made with this key
    pub fn record(&self, success: bool, latency: Duration) {
        self.state().counters.record(success, latency);
    }

    pub fn counters(&self) -> RequestCounters {
        self.state().counters
    }

    /// Consistent copy of this key's public fields
    pub fn snapshot(&self) -> KeySnapshot {
        let state = self.state();
        KeySnapshot {
            display_id: self.display_id.clone(),
            secret: self.secret.clone(),
            status: state.status,
            attempts: state.counters.attempts,
            successes: state.counters.successes,
            failures: state.counters.failures,
            mean_latency_micros: state.counters.mean_latency_micros(),
            status_label: state.status.label(),
        }
    }

    fn state(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("display_id", &self.display_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Value copy of one key, handed to dashboards and the admin API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySnapshot {
    pub display_id: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: KeyStatus,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub mean_latency_micros: u64,
    pub status_label: &'static str,
}

impl KeySnapshot {
    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    pub fn success_rate_percent(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64 * 100.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
