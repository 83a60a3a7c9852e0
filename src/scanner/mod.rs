//! Scanner module - filtered directory enumeration with pause/cancel
//!
//! Walks the configured roots and yields one `FileEntry` per accepted file.
//! Unreadable entries are logged and skipped, never propagated; the pause
//! latch and cancellation signal are consulted before every entry.

use std::collections::HashSet;
use std::path::PathBuf;

use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::core::FileEntry;
use crate::orchestrator::ScanControls;

/// Canonicalize roots, drop duplicates, and coalesce prefix overlap: a root
/// that lives inside another listed root would be enumerated twice, so the
/// parent absorbs it.
pub fn normalize_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut canonical: Vec<PathBuf> = Vec::new();
    for root in roots {
        match root.canonicalize() {
            Ok(resolved) => {
                if !canonical.contains(&resolved) {
                    canonical.push(resolved);
                }
            }
            Err(e) => {
                tracing::warn!("skipping unresolvable root {}: {}", root.display(), e);
            }
        }
    }

    let mut kept: Vec<PathBuf> = Vec::new();
    for root in &canonical {
        let shadowed = canonical
            .iter()
            .any(|other| other != root && root.starts_with(other));
        if shadowed {
            tracing::debug!("root {} coalesced into its parent", root.display());
        } else {
            kept.push(root.clone());
        }
    }

    kept.sort();
    kept
}

/// Filtered directory walker.
pub struct FileScanner {
    config: ScanConfig,
    controls: ScanControls,
}

impl FileScanner {
    pub fn new(config: &ScanConfig, controls: ScanControls) -> Self {
        Self {
            config: config.clone(),
            controls,
        }
    }

    /// Enumerate all roots, invoking `on_discover` for each accepted file
    /// before it is added to the returned list.
    ///
    /// On cancellation the partial list collected so far is returned; the
    /// caller distinguishes that through the shared controls.
    pub fn scan<F>(&self, mut on_discover: F) -> Vec<FileEntry>
    where
        F: FnMut(&FileEntry),
    {
        let roots = normalize_roots(&self.config.roots);
        let extension_filter = self.config.extension_filter();

        let mut entries = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        'roots: for root in &roots {
            let mut walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
            if !self.config.recursive {
                walker = walker.max_depth(1);
            }

            let include_hidden = self.config.include_hidden;
            let root_clone = root.clone();
            let iter = walker.into_iter().filter_entry(move |e| {
                // The root itself is always entered, even when hidden.
                include_hidden || e.path() == root_clone || !is_hidden(e)
            });

            for item in iter {
                if !self.controls.checkpoint() {
                    break 'roots;
                }

                let entry = match item {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("unreadable directory entry: {}", e);
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                if let Some(ref allowed) = extension_filter {
                    let ext = entry
                        .path()
                        .extension()
                        .map(|e| e.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    if !allowed.contains(&ext) {
                        continue;
                    }
                }

                // Attribute access failure converts the entry to a skip.
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("skipping {}: {}", entry.path().display(), e);
                        continue;
                    }
                };

                if !self.config.size_in_range(metadata.len()) {
                    continue;
                }

                let path = entry.path().to_path_buf();
                if !seen.insert(path.clone()) {
                    continue;
                }

                let file_entry = FileEntry::from_metadata(path, &metadata);
                on_discover(&file_entry);
                entries.push(file_entry);
            }
        }

        entries
    }
}

/// Hidden check: dotfile on every platform, plus the hidden attribute on
/// Windows.
fn is_hidden(entry: &DirEntry) -> bool {
    if entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
    {
        return true;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
        if let Ok(metadata) = entry.metadata() {
            let attrs = metadata.file_attributes();
            return attrs & (FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM) != 0;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn scan_with_config(config: ScanConfig) -> Vec<FileEntry> {
        let scanner = FileScanner::new(&config, ScanControls::new());
        scanner.scan(|_| {})
    }

    fn base_config(root: &Path) -> ScanConfig {
        ScanConfig {
            roots: vec![root.to_path_buf()],
            scan_all_files: true,
            include_hidden: true, // temp dirs may live under dot-paths
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_finds_nested_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bbb").unwrap();

        let entries = scan_with_config(base_config(dir.path()));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_non_recursive_stays_at_top_level() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bbb").unwrap();

        let config = ScanConfig {
            recursive: false,
            ..base_config(dir.path())
        };
        let entries = scan_with_config(config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "a.txt");
    }

    #[test]
    fn test_extension_filter_applies() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("keep.jpg"), b"img").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"txt").unwrap();

        let config = ScanConfig {
            scan_all_files: false,
            include_images: true,
            include_videos: false,
            include_audio: false,
            include_documents: false,
            ..base_config(dir.path())
        };
        let entries = scan_with_config(config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extension, "jpg");
    }

    #[test]
    fn test_size_filter_applies() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("small.bin"), b"xy").unwrap();
        std::fs::write(dir.path().join("large.bin"), vec![0u8; 4096]).unwrap();

        let config = ScanConfig {
            min_size: 100,
            ..base_config(dir.path())
        };
        let entries = scan_with_config(config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "large.bin");
    }

    #[test]
    fn test_hidden_files_are_skipped_by_default() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), b"v").unwrap();
        std::fs::write(dir.path().join(".hidden.txt"), b"h").unwrap();
        std::fs::create_dir_all(dir.path().join(".hiddendir")).unwrap();
        std::fs::write(dir.path().join(".hiddendir/inner.txt"), b"i").unwrap();

        let config = ScanConfig {
            include_hidden: false,
            ..base_config(dir.path())
        };
        let names: Vec<String> = scan_with_config(config).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["visible.txt".to_string()]);
    }

    #[test]
    fn test_overlapping_roots_coalesce() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
        std::fs::write(dir.path().join("photos/2024/a.jpg"), b"img").unwrap();

        let roots = vec![
            dir.path().join("photos"),
            dir.path().join("photos/2024"), // child of the first
            dir.path().join("photos"),      // exact duplicate
        ];
        let normalized = normalize_roots(&roots);
        assert_eq!(normalized.len(), 1);

        let config = ScanConfig {
            roots,
            ..base_config(dir.path())
        };
        let entries = scan_with_config(config);
        assert_eq!(entries.len(), 1, "no path may be enumerated twice");
    }

    #[test]
    fn test_missing_root_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let config = ScanConfig {
            roots: vec![dir.path().to_path_buf(), PathBuf::from("/no/such/root")],
            ..base_config(dir.path())
        };
        let entries = scan_with_config(config);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_discovery_callback_fires_per_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let scanner = FileScanner::new(&base_config(dir.path()), ScanControls::new());
        let mut discovered = 0usize;
        let entries = scanner.scan(|_| discovered += 1);

        assert_eq!(discovered, entries.len());
        assert_eq!(discovered, 2);
    }

    #[test]
    fn test_cancelled_scan_stops_early() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("f{}.txt", i)), b"x").unwrap();
        }

        let controls = ScanControls::new();
        controls.cancel();
        let scanner = FileScanner::new(&base_config(dir.path()), controls);
        let entries = scanner.scan(|_| {});

        assert!(entries.is_empty());
    }
}
