//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::services::{
    ForwardingPipeline, GlobalStats, KeyPool, ReqwestTransport, SettingsManager, SystemMonitor,
    UpstreamTransport,
};
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
///
/// Cheap to clone; every field is behind an `Arc`. The pool and the global
/// stats are the same instances the pipeline records into, so admin handlers
/// always read live data.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,

    pub pool: Arc<KeyPool>,

    pub stats: Arc<GlobalStats>,

    pub pipeline: Arc<ForwardingPipeline>,

    /// Display settings changed through the admin API
    pub display: Arc<SettingsManager>,

    /// Process CPU and memory sampler for the dashboard
    pub system: Arc<SystemMonitor>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Build the state with a `reqwest` transport to the configured upstream
    pub fn new(settings: Settings, keys: Vec<String>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(settings.timeouts().connect_timeout)
            .context("Failed to build upstream HTTP client")?;
        Self::with_transport(settings, keys, Arc::new(transport))
    }

    /// Build the state around any [`UpstreamTransport`]
    pub fn with_transport(
        settings: Settings,
        keys: Vec<String>,
        transport: Arc<dyn UpstreamTransport>,
    ) -> anyhow::Result<Self> {
        let upstream = settings.upstream()?;
        let pool = Arc::new(KeyPool::new(keys).context("Failed to build key pool")?);
        let stats = Arc::new(GlobalStats::new(settings.max_recent_errors));

        let pipeline = Arc::new(
            ForwardingPipeline::new(
                Arc::clone(&pool),
                Arc::clone(&stats),
                transport,
                upstream,
                settings.timeouts().upstream_timeout,
            )
            .with_max_body_bytes(settings.max_body_bytes),
        );

        tracing::info!(
            keys = pool.len(),
            upstream = %pipeline.upstream(),
            "Application state initialized successfully"
        );

        Ok(Self {
            settings: Arc::new(settings),
            pool,
            stats,
            pipeline,
            display: Arc::new(SettingsManager::default()),
            system: Arc::new(SystemMonitor::new()),
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
