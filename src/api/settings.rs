//! Settings endpoints
//!
//! Read and replace the display settings, and enable or disable keys in bulk.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::state::AppState;
use crate::services::settings::{DisplaySettings, KeyDisplayFormat};
use crate::services::KeySnapshot;

/// One key as listed in the settings document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeySettingItem {
    #[serde(default)]
    pub key_alias: String,
    /// Full secret; required to address a key in updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub is_enabled: bool,
}

impl KeySettingItem {
    fn from_snapshot(snapshot: &KeySnapshot, format: KeyDisplayFormat, with_secret: bool) -> Self {
        Self {
            key_alias: format.render(&snapshot.secret),
            key: with_secret.then(|| snapshot.secret.clone()),
            is_enabled: snapshot.is_enabled(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub settings: DisplaySettings,
    pub api_keys: Vec<KeySettingItem>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(flatten)]
    pub settings: DisplaySettings,
    #[serde(default)]
    pub api_keys: Vec<KeySettingItem>,
}

fn settings_response(state: &AppState, with_secrets: bool) -> SettingsResponse {
    let settings = state.display.get();
    let api_keys = state
        .pool
        .snapshot()
        .iter()
        .map(|key| {
            KeySettingItem::from_snapshot(key, settings.api_key_display_format, with_secrets)
        })
        .collect();

    SettingsResponse {
        last_updated: Utc::now(),
        settings,
        api_keys,
    }
}

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(settings_response(&state, false))
}

/// POST /api/v1/settings
///
/// Display settings are validated and applied first, all or nothing. Key
/// updates are then applied one by one; entries without `key` are skipped.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let applied = state.display.update(request.settings)?;
    state
        .stats
        .set_error_capacity(applied.max_recent_errors_displayed);

    let mut failures = Vec::new();
    for item in &request.api_keys {
        let Some(secret) = item.key.as_deref() else {
            tracing::warn!(
                key_alias = %item.key_alias,
                "Key update without 'key' field, skipping"
            );
            continue;
        };
        if let Err(err) = state.pool.set_enabled(secret, item.is_enabled) {
            tracing::error!(
                key_alias = %item.key_alias,
                error = %err,
                "Failed to update key status"
            );
            failures.push(err.to_string());
        }
    }

    if !failures.is_empty() {
        return Err(ApiError::NotFound(format!(
            "failed to update one or more API keys: {}",
            failures.join("; ")
        )));
    }

    Ok(Json(settings_response(&state, true)))
}
