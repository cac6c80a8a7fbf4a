//! Raw statistics endpoints
//!
//! Serialized snapshots as taken; key secrets never appear in the output.

use axum::{extract::State, Json};

use crate::server::state::AppState;
use crate::services::{GlobalSnapshot, KeySnapshot};

/// GET /api/v1/stats/global
pub async fn global_stats(State(state): State<AppState>) -> Json<GlobalSnapshot> {
    Json(state.stats.snapshot())
}

/// GET /api/v1/stats/keys
pub async fn key_stats(State(state): State<AppState>) -> Json<Vec<KeySnapshot>> {
    Json(state.pool.snapshot())
}
