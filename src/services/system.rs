//! Process resource sampling for the dashboard

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Resource usage of the proxy process
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemInformation {
    /// CPU usage since the previous sample, per core (can exceed 100 on
    /// multi-core hosts; 0 on the first sample)
    pub cpu_usage_percent: f64,
    /// Resident memory of the proxy process
    pub memory_usage_mb: f64,
    /// Physical memory of the host
    pub total_memory_mb: f64,
    pub proxy_uptime_seconds: u64,
}

/// Samples CPU and memory for the current process
///
/// The `System` handle is kept between samples because CPU usage is measured
/// as the delta since the previous refresh.
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_processes(process_refresh_kind())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!(error = err, "Process metrics unavailable on this platform");
                None
            }
        };

        Self {
            system: Mutex::new(system),
            pid,
        }
    }

    /// Refresh the process and host counters and return a sample
    pub fn sample(&self, uptime_seconds: u64) -> SystemInformation {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        let mut info = SystemInformation {
            total_memory_mb: system.total_memory() as f64 / BYTES_PER_MB,
            proxy_uptime_seconds: uptime_seconds,
            ..SystemInformation::default()
        };

        if let Some(pid) = self.pid {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                process_refresh_kind(),
            );
            if let Some(process) = system.process(pid) {
                info.cpu_usage_percent = f64::from(process.cpu_usage());
                info.memory_usage_mb = process.memory() as f64 / BYTES_PER_MB;
            }
        }

        info
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn process_refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_cpu().with_memory()
}
