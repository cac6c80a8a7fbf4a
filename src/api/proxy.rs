//! Catch-all proxy handler
//!
//! Every method and path on the proxy listener ends up here.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::server::state::AppState;
use crate::services::forwarding::{ProxyRequest, BAD_GATEWAY_BODY};

/// Forward a request upstream with the next API key
///
/// The pipeline runs on its own task: if the client goes away mid-request the
/// exchange still completes and is recorded.
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let pipeline = Arc::clone(&state.pipeline);
    let task = tokio::spawn(async move { pipeline.forward(ProxyRequest::from(request)).await });

    match task.await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "Forwarding task failed");
            (StatusCode::BAD_GATEWAY, BAD_GATEWAY_BODY).into_response()
        }
    }
}
