//! Storage-medium classification for I/O concurrency tuning
//!
//! Each scan root is classified once (cached) as network, removable,
//! solid-state, rotating, or unknown; the class picks the I/O worker
//! degree. Probing is best-effort: sysinfo disk lists plus the Linux
//! rotational flag, defaulting to solid-state on desktop platforms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sysinfo::Disks;

/// Device class behind a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMedium {
    Network,
    Removable,
    SolidState,
    Rotating,
    Unknown,
}

impl StorageMedium {
    /// Default I/O worker degree for this medium. Rotating media prefer
    /// near-sequential access.
    pub fn io_degree(&self) -> usize {
        match self {
            StorageMedium::SolidState => 8,
            StorageMedium::Network => 4,
            StorageMedium::Rotating => 2,
            StorageMedium::Removable => 2,
            StorageMedium::Unknown => 4,
        }
    }
}

/// Filesystem types that indicate network storage.
fn is_network_fs(fs_type: &str) -> bool {
    let fs = fs_type.to_lowercase();
    fs.contains("nfs")
        || fs.contains("smb")
        || fs.contains("cifs")
        || fs.contains("afp")
        || fs.contains("webdav")
        || fs.contains("sshfs")
        || fs.contains("9p")
}

/// Per-root classifier with memoized results.
pub struct StorageClassifier {
    cache: Mutex<HashMap<PathBuf, StorageMedium>>,
}

impl StorageClassifier {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify the medium under a path, caching per root.
    pub fn classify(&self, root: &Path) -> StorageMedium {
        if let Some(&cached) = self.cache.lock().get(root) {
            return cached;
        }

        let medium = probe_medium(root);
        tracing::debug!("storage medium for {}: {:?}", root.display(), medium);
        self.cache.lock().insert(root.to_path_buf(), medium);
        medium
    }
}

impl Default for StorageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn probe_medium(path: &Path) -> StorageMedium {
    // UNC network shares are network regardless of what probing says.
    let path_str = path.to_string_lossy();
    if path_str.starts_with("\\\\") || path_str.starts_with("//") {
        return StorageMedium::Network;
    }

    let disks = Disks::new_with_refreshed_list();

    // Longest mount-point prefix wins.
    let disk = disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    let Some(disk) = disk else {
        return fallback_medium();
    };

    if is_network_fs(&disk.file_system().to_string_lossy()) {
        return StorageMedium::Network;
    }
    if disk.is_removable() {
        return StorageMedium::Removable;
    }

    match disk.kind() {
        sysinfo::DiskKind::SSD => StorageMedium::SolidState,
        sysinfo::DiskKind::HDD => StorageMedium::Rotating,
        sysinfo::DiskKind::Unknown(_) => {
            read_rotational_from_sys(disk).unwrap_or_else(fallback_medium)
        }
    }
}

/// /sys/block/{device}/queue/rotational distinguishes HDD (1) from SSD (0).
#[cfg(target_os = "linux")]
fn read_rotational_from_sys(disk: &sysinfo::Disk) -> Option<StorageMedium> {
    let name = disk.name().to_str()?;
    let dev_name = name.strip_prefix("/dev/")?;
    // Strip partition suffix: sda1 -> sda, nvme0n1p1 -> nvme0n1
    let base_dev = if dev_name.starts_with("nvme") {
        dev_name.split('p').next().unwrap_or(dev_name)
    } else {
        dev_name.trim_end_matches(char::is_numeric)
    };

    let rotational = std::fs::read_to_string(format!("/sys/block/{}/queue/rotational", base_dev))
        .ok()?;
    Some(if rotational.trim() == "1" {
        StorageMedium::Rotating
    } else {
        StorageMedium::SolidState
    })
}

#[cfg(not(target_os = "linux"))]
fn read_rotational_from_sys(_disk: &sysinfo::Disk) -> Option<StorageMedium> {
    None
}

/// When probing tells us nothing: assume solid-state on desktop platforms,
/// unknown elsewhere.
fn fallback_medium() -> StorageMedium {
    if cfg!(any(target_os = "linux", target_os = "windows", target_os = "macos")) {
        StorageMedium::SolidState
    } else {
        StorageMedium::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_degrees() {
        assert_eq!(StorageMedium::SolidState.io_degree(), 8);
        assert_eq!(StorageMedium::Rotating.io_degree(), 2);
        assert_eq!(StorageMedium::Network.io_degree(), 4);
        assert_eq!(StorageMedium::Removable.io_degree(), 2);
        assert_eq!(StorageMedium::Unknown.io_degree(), 4);
    }

    #[test]
    fn test_network_fs_names() {
        assert!(is_network_fs("nfs4"));
        assert!(is_network_fs("CIFS"));
        assert!(is_network_fs("fuse.sshfs"));
        assert!(!is_network_fs("ext4"));
        assert!(!is_network_fs("btrfs"));
    }

    #[test]
    fn test_unc_paths_are_network() {
        assert_eq!(
            probe_medium(Path::new("//server/share/photos")),
            StorageMedium::Network
        );
    }

    #[test]
    fn test_classification_is_cached_per_root() {
        let classifier = StorageClassifier::new();
        let dir = tempfile::tempdir().unwrap();

        let first = classifier.classify(dir.path());
        let second = classifier.classify(dir.path());
        assert_eq!(first, second);
        assert_eq!(classifier.cache.lock().len(), 1);
    }
}
