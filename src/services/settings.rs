//! Runtime display settings
//!
//! Settings that monitoring clients can change while the proxy runs: the UI
//! refresh rate, how key aliases are rendered and how many recent errors are
//! kept for display. Every field is validated before any of them is applied.

use crate::utils::{first_chars, mask_key};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Allowed UI refresh intervals, in seconds
pub const ALLOWED_REFRESH_RATES: [u32; 5] = [1, 2, 3, 5, 10];

/// Allowed sizes of the displayed recent-error list
pub const ALLOWED_MAX_ERRORS: [usize; 5] = [5, 10, 15, 20, 25];

pub const DEFAULT_REFRESH_RATE_SECONDS: u32 = 2;
pub const DEFAULT_MAX_RECENT_ERRORS: usize = 10;

/// Number of leading characters shown by [`KeyDisplayFormat::First8Chars`]
const PREFIX_CHARS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid ui_refresh_rate_seconds value: {0}. Allowed values: {{1, 2, 3, 5, 10}}")]
    InvalidRefreshRate(u32),

    #[error("invalid max_recent_errors_displayed: {0}. Allowed values: {{5, 10, 15, 20, 25}}")]
    InvalidMaxErrors(usize),
}

/// How key aliases are rendered for monitoring clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum KeyDisplayFormat {
    #[default]
    Masked,
    Full,
    #[serde(rename = "First 8 Chars")]
    First8Chars,
}

impl KeyDisplayFormat {
    /// Render a secret in this format
    pub fn render(self, secret: &str) -> String {
        match self {
            Self::Masked => mask_key(secret),
            Self::Full => secret.to_string(),
            Self::First8Chars => {
                let prefix = first_chars(secret, PREFIX_CHARS);
                if prefix.len() < secret.len() {
                    format!("{}...", prefix)
                } else {
                    prefix.to_string()
                }
            }
        }
    }
}

impl fmt::Display for KeyDisplayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Masked => write!(f, "Masked"),
            Self::Full => write!(f, "Full"),
            Self::First8Chars => write!(f, "First 8 Chars"),
        }
    }
}

/// One consistent set of display settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplaySettings {
    pub ui_refresh_rate_seconds: u32,
    pub api_key_display_format: KeyDisplayFormat,
    pub max_recent_errors_displayed: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            ui_refresh_rate_seconds: DEFAULT_REFRESH_RATE_SECONDS,
            api_key_display_format: KeyDisplayFormat::Masked,
            max_recent_errors_displayed: DEFAULT_MAX_RECENT_ERRORS,
        }
    }
}

impl DisplaySettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !ALLOWED_REFRESH_RATES.contains(&self.ui_refresh_rate_seconds) {
            return Err(SettingsError::InvalidRefreshRate(self.ui_refresh_rate_seconds));
        }
        if !ALLOWED_MAX_ERRORS.contains(&self.max_recent_errors_displayed) {
            return Err(SettingsError::InvalidMaxErrors(
                self.max_recent_errors_displayed,
            ));
        }
        Ok(())
    }
}

/// Shared, lock-protected [`DisplaySettings`]
#[derive(Debug, Default)]
pub struct SettingsManager {
    current: RwLock<DisplaySettings>,
}

impl SettingsManager {
    pub fn new(initial: DisplaySettings) -> Result<Self, SettingsError> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(initial),
        })
    }

    pub fn get(&self) -> DisplaySettings {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace all settings at once; nothing changes if any field is invalid
    pub fn update(&self, settings: DisplaySettings) -> Result<DisplaySettings, SettingsError> {
        settings.validate()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = settings;
        tracing::info!(
            ui_refresh_rate_seconds = settings.ui_refresh_rate_seconds,
            api_key_display_format = %settings.api_key_display_format,
            max_recent_errors_displayed = settings.max_recent_errors_displayed,
            "Display settings updated"
        );
        Ok(settings)
    }

    pub fn key_display_format(&self) -> KeyDisplayFormat {
        self.get().api_key_display_format
    }

    pub fn max_recent_errors_displayed(&self) -> usize {
        self.get().max_recent_errors_displayed
    }
}
