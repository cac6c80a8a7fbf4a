//! Dashboard endpoint
//!
//! Flattens the global and per-key snapshots, plus a resource sample of the
//! proxy process, into one document for monitoring clients.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::server::state::AppState;
use crate::services::settings::{DisplaySettings, KeyDisplayFormat};
use crate::services::stats::{ErrorEvent, GlobalSnapshot};
use crate::services::{KeySnapshot, SystemInformation};

/// Number of keys listed in each performance ranking
pub const RANKING_SIZE: usize = 5;

const HANDLER_NAME: &str = "Gemini API Proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerStatus {
    Online,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HandlerStatusItem {
    pub name: String,
    pub status: HandlerStatus,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct RecentErrorItem {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub source: String,
}

impl From<&ErrorEvent> for RecentErrorItem {
    fn from(event: &ErrorEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            message: format!(
                "Type: {}, Key: {}, Model: {}, Source: {}, Details: {}",
                event.kind, event.key_id, event.model, event.stage, event.message
            ),
            source: event.stage.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProxyStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_requests: i64,
    pub average_latency_ms: f64,
    pub success_rate_percent: f64,
}

impl From<&GlobalSnapshot> for ProxyStatistics {
    fn from(snapshot: &GlobalSnapshot) -> Self {
        Self {
            total_requests: snapshot.total_attempts,
            successful_requests: snapshot.total_successes,
            failed_requests: snapshot.total_failures,
            active_requests: snapshot.active_in_flight,
            average_latency_ms: micros_to_ms(snapshot.mean_latency_micros),
            success_rate_percent: snapshot.success_rate_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyPerformanceItem {
    pub key_alias: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub success_rate_percent: f64,
    pub is_enabled: bool,
    pub status: &'static str,
}

impl KeyPerformanceItem {
    pub fn new(key: &KeySnapshot, format: KeyDisplayFormat) -> Self {
        Self {
            key_alias: format.render(&key.secret),
            total_requests: key.attempts,
            successful_requests: key.successes,
            failed_requests: key.failures,
            average_latency_ms: micros_to_ms(key.mean_latency_micros),
            success_rate_percent: key.success_rate_percent(),
            is_enabled: key.is_enabled(),
            status: key.status_label,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyPerformance {
    pub top_performing_keys: Vec<KeyPerformanceItem>,
    pub bottom_performing_keys: Vec<KeyPerformanceItem>,
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub last_updated: DateTime<Utc>,
    pub handler_status: Vec<HandlerStatusItem>,
    pub recent_errors: Vec<RecentErrorItem>,
    pub proxy_statistics: ProxyStatistics,
    pub api_key_performance: KeyPerformance,
    pub system_information: SystemInformation,
    pub proxy_uptime_seconds: u64,
    pub ui_refresh_rate_seconds: u32,
}

impl DashboardData {
    /// Assemble the dashboard from snapshots already taken
    pub fn build(
        global: &GlobalSnapshot,
        keys: &[KeySnapshot],
        display: DisplaySettings,
        system: SystemInformation,
    ) -> Self {
        let uptime_seconds = system.proxy_uptime_seconds;
        let status = if keys.iter().any(KeySnapshot::is_enabled) {
            HandlerStatus::Online
        } else {
            HandlerStatus::Degraded
        };

        let recent_errors = global
            .recent_errors
            .iter()
            .take(display.max_recent_errors_displayed)
            .map(RecentErrorItem::from)
            .collect();

        let mut ranked: Vec<KeyPerformanceItem> = keys
            .iter()
            .map(|key| KeyPerformanceItem::new(key, display.api_key_display_format))
            .collect();

        ranked.sort_by(best_first);
        let top_performing_keys = ranked.iter().take(RANKING_SIZE).cloned().collect();

        ranked.sort_by(|a, b| best_first(b, a));
        let bottom_performing_keys = ranked.into_iter().take(RANKING_SIZE).collect();

        Self {
            last_updated: Utc::now(),
            handler_status: vec![HandlerStatusItem {
                name: HANDLER_NAME.to_string(),
                status,
                uptime_seconds,
            }],
            recent_errors,
            proxy_statistics: ProxyStatistics::from(global),
            api_key_performance: KeyPerformance {
                top_performing_keys,
                bottom_performing_keys,
            },
            system_information: system,
            proxy_uptime_seconds: uptime_seconds,
            ui_refresh_rate_seconds: display.ui_refresh_rate_seconds,
        }
    }
}

/// Higher success rate first, then more requests
fn best_first(a: &KeyPerformanceItem, b: &KeyPerformanceItem) -> Ordering {
    b.success_rate_percent
        .total_cmp(&a.success_rate_percent)
        .then_with(|| b.total_requests.cmp(&a.total_requests))
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// GET /api/v1/dashboard
pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardData> {
    let global = state.stats.snapshot();
    let keys = state.pool.snapshot();
    let system = state.system.sample(state.uptime_seconds());
    Json(DashboardData::build(&global, &keys, state.display.get(), system))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stats::{record_outcome, GlobalStats, Outcome};
    use crate::services::KeyPool;
    use axum::http::StatusCode;
    use std::time::Duration;

    fn up_for(seconds: u64) -> SystemInformation {
        SystemInformation {
            proxy_uptime_seconds: seconds,
            ..SystemInformation::default()
        }
    }

    fn pool_with_history() -> (KeyPool, GlobalStats) {
        let pool = KeyPool::new((0..7).map(|i| format!("secret-key-{:05}", i))).unwrap();
        let global = GlobalStats::default();
        for (i, key) in pool.snapshot().iter().enumerate() {
            let key = pool.find(&key.secret).unwrap();
            for attempt in 0..7 {
                let outcome = if attempt < i {
                    Outcome::Failure(ErrorEvent::status(
                        "/v1beta/models/gemini-pro:generateContent",
                        Some(key.display_id()),
                        StatusCode::TOO_MANY_REQUESTS,
                    ))
                } else {
                    Outcome::Success
                };
                record_outcome(&global, Some(&key), outcome, Duration::from_millis(2));
            }
        }
        (pool, global)
    }

    #[test]
    fn test_rankings() {
        let (pool, global) = pool_with_history();
        let data = DashboardData::build(
            &global.snapshot(),
            &pool.snapshot(),
            DisplaySettings::default(),
            up_for(42),
        );

        let top: Vec<&str> = data
            .api_key_performance
            .top_performing_keys
            .iter()
            .map(|k| k.key_alias.as_str())
            .collect();
        assert_eq!(top, vec!["...00000", "...00001", "...00002", "...00003", "...00004"]);

        let bottom: Vec<&str> = data
            .api_key_performance
            .bottom_performing_keys
            .iter()
            .map(|k| k.key_alias.as_str())
            .collect();
        assert_eq!(bottom, vec!["...00006", "...00005", "...00004", "...00003", "...00002"]);

        assert_eq!(data.handler_status[0].status, HandlerStatus::Online);
        assert_eq!(data.proxy_uptime_seconds, 42);
        assert_eq!(data.system_information.proxy_uptime_seconds, 42);
        assert_eq!(data.proxy_statistics.total_requests, 49);
        assert_eq!(data.proxy_statistics.average_latency_ms, 2.0);
    }

    #[test]
    fn test_recent_errors_limited_and_formatted() {
        let (pool, global) = pool_with_history();
        let display = DisplaySettings {
            max_recent_errors_displayed: 5,
            ..DisplaySettings::default()
        };
        let data = DashboardData::build(&global.snapshot(), &pool.snapshot(), display, up_for(0));

        assert_eq!(data.recent_errors.len(), 5);
        assert_eq!(
            data.recent_errors[0].message,
            concat!(
                "Type: HTTP 429, Key: ...00006, Model: gemini-pro, ",
                "Source: response, Details: Too Many Requests"
            )
        );
        assert_eq!(data.recent_errors[0].source, "response");
    }

    #[test]
    fn test_display_format_applies_to_aliases() {
        let (pool, global) = pool_with_history();
        let display = DisplaySettings {
            api_key_display_format: KeyDisplayFormat::First8Chars,
            ..DisplaySettings::default()
        };
        let data = DashboardData::build(&global.snapshot(), &pool.snapshot(), display, up_for(0));
        assert_eq!(
            data.api_key_performance.top_performing_keys[0].key_alias,
            "secret-k..."
        );
    }

    #[test]
    fn test_degraded_when_all_disabled() {
        let pool = KeyPool::new(["secret-AAAAA"]).unwrap();
        pool.set_enabled("secret-AAAAA", false).unwrap();
        let data = DashboardData::build(
            &GlobalStats::default().snapshot(),
            &pool.snapshot(),
            DisplaySettings::default(),
            up_for(0),
        );
        assert_eq!(data.handler_status[0].status, HandlerStatus::Degraded);
        assert!(data.recent_errors.is_empty());
        assert_eq!(data.api_key_performance.top_performing_keys.len(), 1);
    }

    #[test]
    fn test_system_information_section() {
        let (pool, global) = pool_with_history();
        let system = SystemInformation {
            cpu_usage_percent: 12.5,
            memory_usage_mb: 48.0,
            total_memory_mb: 16384.0,
            proxy_uptime_seconds: 90,
        };
        let data = DashboardData::build(
            &global.snapshot(),
            &pool.snapshot(),
            DisplaySettings::default(),
            system.clone(),
        );
        assert_eq!(data.system_information, system);

        let json = serde_json::to_value(&data).unwrap();
        let section = &json["system_information"];
        assert_eq!(section["cpu_usage_percent"], 12.5);
        assert_eq!(section["memory_usage_mb"], 48.0);
        assert_eq!(section["total_memory_mb"], 16384.0);
        assert_eq!(section["proxy_uptime_seconds"], 90);
        assert_eq!(json["proxy_uptime_seconds"], 90);
    }
}
