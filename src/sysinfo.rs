//! Host capacity introspection.

use crate::error::{Error, Result};
use crate::orchestrator::SysInfoProvider;
use std::fs;
use std::path::PathBuf;

/// Reads totals from `/proc/meminfo` and the depot filesystem.
pub struct ProcSysInfo {
    meminfo_path: PathBuf,
    disk_path: PathBuf,
}

impl ProcSysInfo {
    /// `disk_path` is the filesystem whose size counts as container
    /// disk capacity, normally the depot root.
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
            disk_path: disk_path.into(),
        }
    }

    #[cfg(test)]
    fn with_meminfo(mut self, path: impl Into<PathBuf>) -> Self {
        self.meminfo_path = path.into();
        self
    }
}

impl SysInfoProvider for ProcSysInfo {
    fn total_memory(&self) -> Result<u64> {
        let raw = fs::read_to_string(&self.meminfo_path)
            .map_err(|err| Error::SysInfo(format!("reading {}: {err}", self.meminfo_path.display())))?;

        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: u64 = rest
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .map_err(|err| Error::SysInfo(format!("parsing MemTotal: {err}")))?;
                return Ok(kb * 1024);
            }
        }

        Err(Error::SysInfo(format!(
            "MemTotal missing from {}",
            self.meminfo_path.display()
        )))
    }

    fn total_disk(&self) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(&self.disk_path)
            .map_err(|err| Error::SysInfo(format!("statvfs {}: {err}", self.disk_path.display())))?;
        Ok(stat.blocks() as u64 * stat.fragment_size() as u64)
    }
}
