//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use crate::services::forwarding::DEFAULT_MAX_BODY_BYTES;
use crate::utils::TimeoutConfig;
use anyhow::{Context, Result};
use clap::ValueEnum;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com";

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment: {}. Expected: development, staging, or production",
                s
            ),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Proxy listener
    pub host: String,
    pub port: u16,

    // Admin listener (port 0 disables it)
    pub admin_host: String,
    pub admin_port: u16,

    // Credentials
    pub keys_file: PathBuf,

    // Upstream
    pub upstream_url: String,
    pub upstream_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_body_bytes: usize,

    // Statistics
    pub max_recent_errors: usize,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let settings = Self {
            app_name: env_or_default("APP_NAME", &defaults.app_name),
            app_version: defaults.app_version,
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", &defaults.log_level),

            host: env_or_default("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,

            admin_host: env_or_default("ADMIN_HOST", &defaults.admin_host),
            admin_port: env_parse("ADMIN_PORT", defaults.admin_port)?,

            keys_file: env::var("KEYS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.keys_file),

            upstream_url: env_or_default("UPSTREAM_URL", &defaults.upstream_url),
            upstream_timeout_seconds: env_parse(
                "UPSTREAM_TIMEOUT_SECONDS",
                defaults.upstream_timeout_seconds,
            )?,
            connect_timeout_seconds: env_parse(
                "CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            )?,
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes)?,

            max_recent_errors: env_parse("MAX_RECENT_ERRORS", defaults.max_recent_errors)?,
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }
        if self.admin_port != 0 && self.admin_port == self.port && self.admin_host == self.host {
            anyhow::bail!("Admin listener cannot share the proxy address {}", self.server_addr());
        }

        self.upstream()?;

        if self.upstream_timeout_seconds == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_SECONDS must be > 0");
        }
        if self.connect_timeout_seconds == 0 {
            anyhow::bail!("CONNECT_TIMEOUT_SECONDS must be > 0");
        }
        if self.max_recent_errors == 0 {
            anyhow::bail!("MAX_RECENT_ERRORS must be > 0");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("MAX_BODY_BYTES must be > 0");
        }

        if self.is_production() && self.admin_enabled() && self.admin_host == "0.0.0.0" {
            tracing::warn!("Admin API is exposed on all interfaces in production!");
        }

        Ok(())
    }

    /// Parsed upstream base URL
    pub fn upstream(&self) -> Result<Url> {
        let url = Url::parse(&self.upstream_url)
            .with_context(|| format!("Invalid UPSTREAM_URL: {}", self.upstream_url))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => anyhow::bail!("UPSTREAM_URL must use http or https, got {}", other),
        }
    }

    /// Upstream and connect timeouts
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::new(
            Duration::from_secs(self.upstream_timeout_seconds),
            Duration::from_secs(self.connect_timeout_seconds),
        )
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_port != 0
    }

    /// Get the proxy listener address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the admin listener address string
    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.admin_host, self.admin_port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "gemini-key-proxy".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            admin_host: "127.0.0.1".to_string(),
            admin_port: 8082,
            keys_file: PathBuf::from("gemini.keys"),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_timeout_seconds: 300,
            connect_timeout_seconds: 10,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_recent_errors: 10,
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
