//! API key file loading
//!
//! The key file holds one secret per line. Surrounding whitespace is trimmed;
//! blank lines and lines starting with `#` are ignored. Repeated secrets are
//! kept once, in first-seen order.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read keys file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no API keys found in '{}'", path.display())]
    NoKeys { path: PathBuf },
}

/// Read the secrets listed in `path`
pub fn load_keys_file(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let keys = parse_keys(&content);
    if keys.is_empty() {
        return Err(ConfigError::NoKeys {
            path: path.to_path_buf(),
        });
    }

    tracing::info!(path = %path.display(), count = keys.len(), "Loaded API keys");
    Ok(keys)
}

/// Extract secrets from key file content
pub fn parse_keys(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for line in content.lines() {
        let key = line.trim();
        if key.is_empty() || key.starts_with('#') {
            continue;
        }
        if !seen.insert(key) {
            tracing::warn!(
                key = %crate::utils::mask_key(key),
                "Duplicate API key in keys file, ignoring repeat"
            );
            continue;
        }
        keys.push(key.to_string());
    }
    keys
}
