//! Key Pool Implementation
//!
//! This module provides the `KeyPool` that rotates requests across a fixed
//! set of API keys and lets operators enable or disable keys at runtime.

use super::credential::{ApiKey, KeySnapshot, KeyStatus};
use super::cursor::RoundRobinCursor;
use crate::utils::mask_key;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by [`KeyPool`] operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("key pool needs at least one API key")]
    Empty,

    #[error("all API keys are disabled")]
    Exhausted,

    /// `key` is already masked
    #[error("key '{key}' not found")]
    NotFound { key: String },
}

impl PoolError {
    fn not_found(secret: &str) -> Self {
        Self::NotFound {
            key: mask_key(secret),
        }
    }
}

// ============================================================================
// Key Pool
// ============================================================================

/// A fixed, ordered set of API keys with blind round-robin selection
///
/// Membership never changes after construction. The pool mutex guards the
/// cursor and serialises selection against enable/disable; each key's own
/// mutex guards its status and counters and is only held momentarily while
/// the pool lock is taken.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<Arc<ApiKey>>,
    cursor: Mutex<RoundRobinCursor>,
}

impl KeyPool {
    /// Create a pool from raw secrets, in order
    pub fn new<I, S>(secrets: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<Arc<ApiKey>> = secrets
            .into_iter()
            .map(|secret| Arc::new(ApiKey::new(secret)))
            .collect();
        if keys.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self {
            keys,
            cursor: Mutex::new(RoundRobinCursor::new()),
        })
    }

    /// Select the next enabled key in rotation order
    ///
    /// Returns [`PoolError::Exhausted`] without moving the cursor when every
    /// key is disabled.
    pub fn select(&self) -> Result<Arc<ApiKey>, PoolError> {
        let mut cursor = self.lock_cursor();
        let keys = &self.keys;
        match cursor.next_available(keys.len(), |idx| keys[idx].is_enabled()) {
            Some(idx) => {
                let key = Arc::clone(&keys[idx]);
                tracing::debug!(key = %key.display_id(), "Selected API key");
                Ok(key)
            }
            None => {
                tracing::error!(
                    severity = "critical",
                    total_keys = keys.len(),
                    "All API keys are disabled"
                );
                Err(PoolError::Exhausted)
            }
        }
    }

    /// Enable or disable the key whose secret equals `secret`
    pub fn set_enabled(&self, secret: &str, enabled: bool) -> Result<(), PoolError> {
        let _cursor = self.lock_cursor();
        let key = self
            .position(secret)
            .map(|idx| &self.keys[idx])
            .ok_or_else(|| PoolError::not_found(secret))?;
        let status = KeyStatus::from_enabled(enabled);
        key.set_status(status);
        tracing::info!(key = %key.display_id(), status = %status, "API key status set");
        Ok(())
    }

    /// Flip the key's enabled flag, returning the new value
    pub fn toggle(&self, secret: &str) -> Result<bool, PoolError> {
        let _cursor = self.lock_cursor();
        let key = self
            .position(secret)
            .map(|idx| &self.keys[idx])
            .ok_or_else(|| PoolError::not_found(secret))?;
        let status = key.flip_status();
        tracing::info!(key = %key.display_id(), status = %status, "API key status toggled");
        Ok(status.is_enabled())
    }

    /// Look a key up by its secret
    pub fn find(&self, secret: &str) -> Option<Arc<ApiKey>> {
        let _cursor = self.lock_cursor();
        self.position(secret).map(|idx| Arc::clone(&self.keys[idx]))
    }

    /// Copy every key's public fields, in pool order
    ///
    /// Each entry is consistent on its own; entries are taken one after the
    /// other, so the list as a whole is not a single instant.
    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        self.keys.iter().map(|key| key.snapshot()).collect()
    }

    /// Get the number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for a constructed pool
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of enabled keys
    pub fn enabled_count(&self) -> usize {
        self.keys.iter().filter(|key| key.is_enabled()).count()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let enabled = self.enabled_count();
        PoolStats {
            total: self.keys.len(),
            enabled,
            disabled: self.keys.len() - enabled,
        }
    }

    fn position(&self, secret: &str) -> Option<usize> {
        self.keys.iter().position(|key| key.secret() == secret)
    }

    fn lock_cursor(&self) -> MutexGuard<'_, RoundRobinCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Enabled/disabled key counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

impl PoolStats {
    /// At least one key can serve requests
    pub fn is_healthy(&self) -> bool {
        self.enabled > 0
    }
}

// ============================================================================
// Tests
// ============================================================================
