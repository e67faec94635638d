//! # Host statistics
//!
//! Snapshots of the host computer's identity and resource usage for the `platform` section of the
//! mower state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::Path;
use sysinfo::{Disks, System};

use comms_if::tm::{CpuLoad, DiskUsage, LoadAverage, MemoryUsage, PlatformState};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Provider of host statistics.
pub trait HostStats {
    /// Refresh and return a full snapshot of the host.
    fn snapshot(&mut self) -> PlatformState;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// [`HostStats`] backed by the operating system.
pub struct SysHostStats {
    sys: System,
    disks: Disks,

    hostname: String,
    operating_system: String,
    platform: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SysHostStats {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            hostname: System::host_name().unwrap_or_default(),
            operating_system: System::name().unwrap_or_default(),
            platform: System::distribution_id(),
        }
    }

    /// Usage of the disk mounted at `/`, or the first disk if there isn't one.
    fn disk_usage(&self) -> DiskUsage {
        let root = Path::new("/");
        self.disks
            .list()
            .iter()
            .find(|d| d.mount_point() == root)
            .or_else(|| self.disks.list().first())
            .map(|d| DiskUsage {
                total: d.total_space(),
                free: d.available_space(),
            })
            .unwrap_or_default()
    }
}

impl Default for SysHostStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStats for SysHostStats {
    fn snapshot(&mut self) -> PlatformState {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        self.disks.refresh();

        let cores: Vec<f64> = self.sys.cpus().iter().map(|c| c.cpu_usage() as f64).collect();
        let load = System::load_average();

        PlatformState {
            hostname: self.hostname.clone(),
            operating_system: self.operating_system.clone(),
            platform: self.platform.clone(),
            cpu_load: CpuLoad {
                count: cores.len(),
                total: self.sys.global_cpu_info().cpu_usage() as f64,
                cores,
            },
            load_average: LoadAverage {
                load1: load.one,
                load5: load.five,
                load15: load.fifteen,
            },
            memory_usage: MemoryUsage {
                total: self.sys.total_memory(),
                available: self.sys.available_memory(),
            },
            disk_usage: self.disk_usage(),
        }
    }
}
