//! Key management endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToggleKeyRequest {
    /// Full secret of the key to flip
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleKeyResponse {
    pub key_alias: String,
    pub is_enabled: bool,
}

/// POST /api/v1/keys/toggle
pub async fn toggle_key(
    State(state): State<AppState>,
    Json(request): Json<ToggleKeyRequest>,
) -> Result<Json<ToggleKeyResponse>, ApiError> {
    let is_enabled = state.pool.toggle(&request.key)?;
    let format = state.display.key_display_format();

    Ok(Json(ToggleKeyResponse {
        key_alias: format.render(&request.key),
        is_enabled,
    }))
}
