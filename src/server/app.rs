//! Application server
//!
//! Runs the proxy listener and, when enabled, the admin listener. Both shut
//! down together on Ctrl+C or SIGTERM.

use crate::{
    config::Settings,
    server::{routes, state::AppState},
};
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Main application struct
pub struct App {
    state: AppState,
}

impl App {
    /// Create a new application instance around the loaded API keys
    pub fn new(settings: Settings, keys: Vec<String>) -> Result<Self> {
        tracing::debug!("Initializing application state");
        let state = AppState::new(settings, keys)?;

        Ok(Self { state })
    }

    /// Run both listeners until a shutdown signal arrives
    pub async fn run_with_graceful_shutdown(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let settings = &self.state.settings;

        let proxy = serve(
            "proxy",
            settings.server_addr(),
            routes::create_proxy_router(self.state.clone()),
            shutdown.clone(),
        );

        let admin = async {
            if settings.admin_enabled() {
                serve(
                    "admin",
                    settings.admin_addr(),
                    routes::create_admin_router(self.state.clone()),
                    shutdown.clone(),
                )
                .await
            } else {
                tracing::info!("Admin API disabled");
                Ok(())
            }
        };

        let signal = {
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = shutdown_signal() => shutdown.cancel(),
                    _ = shutdown.cancelled() => {}
                }
                Ok::<(), anyhow::Error>(())
            }
        };

        // A listener that fails to start takes the other one down with it
        let result = futures::future::try_join3(
            cancel_on_error(proxy, shutdown.clone()),
            cancel_on_error(admin, shutdown.clone()),
            signal,
        )
        .await;

        self.cleanup();
        result.map(|_| ())
    }

    fn cleanup(&self) {
        let snapshot = self.state.stats.snapshot();
        tracing::info!(
            total_requests = snapshot.total_attempts,
            successes = snapshot.total_successes,
            failures = snapshot.total_failures,
            in_flight = snapshot.active_in_flight,
            "Final request statistics"
        );
    }

    /// Get a reference to the application state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the settings
    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }
}

async fn serve(
    name: &str,
    addr: String,
    router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid {} listen address: {}", name, addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} listener on {}", name, addr))?;

    tracing::info!(listener = name, %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .with_context(|| format!("{} listener failed", name))?;

    tracing::info!(listener = name, "Listener stopped");
    Ok(())
}

async fn cancel_on_error(
    task: impl std::future::Future<Output = Result<()>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let result = task.await;
    if result.is_err() {
        shutdown.cancel();
    }
    result
}

/// Create a future that completes when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
