//! Application routing
//!
//! The proxy router forwards everything; the admin router serves health and
//! monitoring endpoints on a separate listener.

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{dashboard, health, keys, proxy, settings, stats};
use crate::middleware::logging::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER};
use crate::server::state::AppState;

/// Create the proxy router: every method and path is forwarded upstream
pub fn create_proxy_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy::forward)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create the admin/monitoring router
pub fn create_admin_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness));

    let api_routes = Router::new()
        .route("/dashboard", get(dashboard::dashboard))
        .route(
            "/settings",
            get(settings::get_settings).post(settings::update_settings),
        )
        .route("/keys/toggle", post(keys::toggle_key))
        .route("/stats/global", get(stats::global_stats))
        .route("/stats/keys", get(stats::key_stats));

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(health_routes)
        // Order matters: first added = outermost = runs first
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer for browser-based dashboards
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}
