use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use sysinfo::{CpuRefreshKind, Disks, Pid, ProcessesToUpdate, RefreshKind, System};

use vigil_core::Host;

/// Host facts backed by `sysinfo`.
pub struct SysHost {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl SysHost {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
            disk_path: disk_path.into(),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Index of the mount point holding `path`: the longest one that prefixes it.
fn longest_mount_match<'a>(path: &Path, mount_points: impl IntoIterator<Item = &'a Path>) -> Option<usize> {
    let mut best = None;
    let mut best_len = 0;

    for (i, mount) in mount_points.into_iter().enumerate() {
        if path.starts_with(mount) {
            let len = mount.as_os_str().len();
            if best.is_none() || len > best_len {
                best = Some(i);
                best_len = len;
            }
        }
    }

    best
}

impl Host for SysHost {
    fn process_exists(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }

    fn load_average(&self) -> [f64; 3] {
        let load = System::load_average();
        [load.one, load.five, load.fifteen]
    }

    fn cpu_percent(&self) -> f32 {
        let mut system = self.system();
        system.refresh_cpu_usage();
        system.global_cpu_usage()
    }

    fn cpu_count(&self) -> usize {
        self.system().cpus().len()
    }

    fn available_disk_space(&self) -> Result<u64> {
        let disks = Disks::new_with_refreshed_list();
        let index = longest_mount_match(&self.disk_path, disks.list().iter().map(|d| d.mount_point()))
            .ok_or_else(|| anyhow::anyhow!("No disk is mounted at {}", self.disk_path.display()))?;
        Ok(disks.list()[index].available_space())
    }
}
