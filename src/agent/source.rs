//! Where the agent's readings come from

use std::sync::Mutex;

use sysinfo::{Disks, System};
use tracing::trace;

use crate::{DriveMetrics, MetricsSnapshot};

const BYTES_PER_MBYTE: u64 = 1024 * 1024;

/// Produces one snapshot per call
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<MetricsSnapshot>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> anyhow::Result<MetricsSnapshot> + Send + Sync,
{
    fn snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        self()
    }
}

/// Reads the local machine via `sysinfo`.
///
/// CPU usage is measured between two consecutive calls, so the first
/// snapshot reports the usage since the source was created.
pub struct SystemSnapshotSource {
    system: Mutex<System>,
    machine_name: String,
}

impl SystemSnapshotSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            machine_name: System::host_name().unwrap_or_else(|| String::from("unknown")),
        }
    }
}

impl Default for SystemSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

fn to_mbytes(bytes: u64) -> i32 {
    i32::try_from(bytes / BYTES_PER_MBYTE).unwrap_or(i32::MAX)
}

impl SnapshotSource for SystemSnapshotSource {
    fn snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let (cpu, available, total) = {
            let mut system = self
                .system
                .lock()
                .map_err(|_| anyhow::anyhow!("system information lock poisoned"))?;
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                system.global_cpu_usage(),
                system.available_memory(),
                system.total_memory(),
            )
        };

        let drives = Disks::new_with_refreshed_list()
            .iter()
            .filter(|disk| to_mbytes(disk.total_space()) > 0)
            .map(|disk| {
                DriveMetrics::new(
                    disk.mount_point().to_string_lossy(),
                    to_mbytes(disk.available_space()),
                    to_mbytes(disk.total_space()),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        trace!("read {} drives", drives.len());

        Ok(MetricsSnapshot::new(
            self.machine_name.clone(),
            cpu,
            to_mbytes(available),
            to_mbytes(total),
            drives,
        )?)
    }
}
