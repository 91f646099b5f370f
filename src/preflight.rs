use crate::logging::RunLog;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use sysinfo::{Disks, System};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of host resource readings.
pub trait ResourceProbe {
    fn available_memory_bytes(&self) -> Option<u64>;
    /// Free space on the filesystem that holds `path`.
    fn available_disk_bytes(&self, path: &Path) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ResourceProbe for SystemProbe {
    fn available_memory_bytes(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }

    fn available_disk_bytes(&self, path: &Path) -> Option<u64> {
        let target = existing_ancestor(path);
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Canonical form of the closest existing ancestor, so a not-yet-created
/// output directory still resolves to the right mount point.
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find_map(|p| fs::canonicalize(p).ok())
        .unwrap_or_else(|| path.to_path_buf())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Memory,
    Disk,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Memory => write!(f, "memory"),
            Resource::Disk => write!(f, "disk space"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightWarning {
    pub resource: Resource,
    pub message: String,
}

impl fmt::Display for PreflightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn as_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Advisory host check; it never fails the run.
pub struct ResourcePreflight<'a> {
    probe: &'a dyn ResourceProbe,
}

impl<'a> ResourcePreflight<'a> {
    pub fn new(probe: &'a dyn ResourceProbe) -> Self {
        Self { probe }
    }

    pub fn check(
        &self,
        required_memory_gb: f64,
        required_disk_gb: f64,
        output_dir: &Path,
        log: &RunLog,
    ) -> Vec<PreflightWarning> {
        let mut warnings = Vec::new();
        let readings = [
            (
                Resource::Memory,
                required_memory_gb,
                self.probe.available_memory_bytes(),
            ),
            (
                Resource::Disk,
                required_disk_gb,
                self.probe.available_disk_bytes(output_dir),
            ),
        ];

        for (resource, required_gb, available) in readings {
            match available {
                Some(bytes) if as_gb(bytes) < required_gb => warnings.push(PreflightWarning {
                    resource,
                    message: format!(
                        "Available {resource} ({:.1} GB) is below the recommended {required_gb:.1} GB",
                        as_gb(bytes)
                    ),
                }),
                Some(bytes) => log.info(format!(
                    "Available {resource}: {:.1} GB (recommended {required_gb:.1} GB)",
                    as_gb(bytes)
                )),
                None => warnings.push(PreflightWarning {
                    resource,
                    message: format!("Could not determine available {resource}"),
                }),
            }
        }

        for warning in &warnings {
            log.warn(warning);
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedProbe, GIB};

    #[test]
    fn no_warnings_when_host_is_large_enough() {
        let probe = FixedProbe {
            memory_bytes: Some(32 * GIB),
            disk_bytes: Some(100 * GIB),
        };
        let warnings = ResourcePreflight::new(&probe).check(
            16.0,
            50.0,
            Path::new("/tmp"),
            &RunLog::console_only(),
        );
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn low_memory_and_disk_only_warn() {
        let probe = FixedProbe {
            memory_bytes: Some(4 * GIB),
            disk_bytes: Some(10 * GIB),
        };
        let warnings = ResourcePreflight::new(&probe).check(
            16.0,
            50.0,
            Path::new("/tmp"),
            &RunLog::console_only(),
        );
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].resource, Resource::Memory);
        assert!(warnings[0].message.contains("4.0 GB"), "{}", warnings[0]);
        assert_eq!(warnings[1].resource, Resource::Disk);
        assert!(warnings[1].message.contains("recommended 50.0 GB"), "{}", warnings[1]);
    }

    #[test]
    fn unknown_readings_are_reported() {
        let probe = FixedProbe {
            memory_bytes: None,
            disk_bytes: Some(100 * GIB),
        };
        let warnings = ResourcePreflight::new(&probe).check(
            1.0,
            1.0,
            Path::new("/tmp"),
            &RunLog::console_only(),
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("Could not determine available memory"));
    }

    #[test]
    fn missing_output_dir_resolves_through_existing_ancestor() {
        let td = tempfile::tempdir().unwrap();
        let nested = td.path().join("not").join("yet");
        let resolved = existing_ancestor(&nested);
        assert_eq!(resolved, fs::canonicalize(td.path()).unwrap());
    }
}
