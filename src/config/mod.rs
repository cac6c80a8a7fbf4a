//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files, and reading the API key file.

pub mod keys;
pub mod settings;

pub use keys::{load_keys_file, ConfigError};
pub use settings::{Environment, Settings};
