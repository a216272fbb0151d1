use ferve_core::{SystemStats, UsageStats};
use std::{path::Path, time::Duration};
use sysinfo::{Disks, System};
use thiserror::Error;

/// Gap between the two CPU refreshes that bound one usage sample.
pub const CPU_SAMPLE_WINDOW: Duration = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("root filesystem not found among {0} mounted disks")]
    RootDiskMissing(usize),
    #[error("sampler unavailable: {0}")]
    Unavailable(String),
}

/// Source of host statistics for the telemetry ticker.
///
/// `begin_window` is called, the ticker sleeps for [`CPU_SAMPLE_WINDOW`], then
/// `sample` reads the figures for that window.
pub trait StatsSampler: Send + 'static {
    fn begin_window(&mut self) {}

    fn sample(&mut self) -> Result<SystemStats, TelemetryError>;
}

pub struct SysinfoSampler {
    system: System,
    disks: Disks,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
        }
    }

    fn root_disk_usage(&mut self) -> Result<UsageStats, TelemetryError> {
        self.disks.refresh();
        let root = self
            .disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"));
        let Some(root) = root else {
            // Mounts may have changed since startup.
            self.disks.refresh_list();
            return Err(TelemetryError::RootDiskMissing(self.disks.list().len()));
        };
        let total = root.total_space();
        let used = total.saturating_sub(root.available_space());
        Ok(UsageStats::from_bytes(used, total))
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSampler for SysinfoSampler {
    fn begin_window(&mut self) {
        self.system.refresh_cpu_usage();
    }

    fn sample(&mut self) -> Result<SystemStats, TelemetryError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let cpu = (self.system.global_cpu_usage() * 10.0).round() / 10.0;
        let memory = UsageStats::from_bytes(self.system.used_memory(), self.system.total_memory());
        let disk = self.root_disk_usage()?;
        Ok(SystemStats { cpu, memory, disk })
    }
}
