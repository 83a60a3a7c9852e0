//! Scan configuration - every recognized option and its defaults
//!
//! Supplied per invocation; the engine never persists it. The CLI can load
//! a profile from TOML, which is why everything here derives serde.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::KeepStrategy;

/// Configuration for one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directories to scan; overlapping entries are coalesced
    pub roots: Vec<PathBuf>,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Include entries with hidden/system attributes
    pub include_hidden: bool,
    /// Traverse symbolic links
    pub follow_symlinks: bool,
    /// Inclusive minimum file size in bytes
    pub min_size: u64,
    /// Inclusive maximum file size in bytes (0 = unlimited)
    pub max_size: u64,

    /// Bypass the extension filter entirely
    pub scan_all_files: bool,
    /// Per-kind extension toggles, used when `scan_all_files` is false
    pub include_images: bool,
    pub include_videos: bool,
    pub include_audio: bool,
    pub include_documents: bool,
    /// Extra extensions to accept regardless of kind (lowercase, no dot)
    pub custom_extensions: Vec<String>,

    /// Phase toggles
    pub use_size_comparison: bool,
    pub use_hash_comparison: bool,
    pub use_resolution_comparison: bool,
    pub use_image_similarity: bool,
    pub use_video_similarity: bool,
    pub use_audio_similarity: bool,

    /// Extra equivalence constraints during exact grouping (day granularity)
    pub match_created_date: bool,
    pub match_modified_date: bool,

    /// How each group's suggested keeper is picked
    pub keep_strategy: KeepStrategy,

    /// Minimum match similarity, percent 0-100
    pub image_similarity_threshold: u8,
    pub video_similarity_threshold: u8,
    pub audio_similarity_threshold: u8,

    /// Requested thumbnail edge length in pixels
    pub thumbnail_edge_px: u32,
    /// Ceiling for the CPU-bound worker pool
    pub parallel_threads: usize,
    /// Enable CPU/memory pressure throttling for workers
    pub adaptive_throttling: bool,

    /// Override path for the external transcoder (ffmpeg-compatible)
    pub transcoder_path: Option<PathBuf>,
    /// Override path for the external prober (ffprobe-compatible)
    pub prober_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            include_hidden: false,
            follow_symlinks: false,
            min_size: 1,
            max_size: 0,
            scan_all_files: false,
            include_images: true,
            include_videos: true,
            include_audio: true,
            include_documents: false,
            custom_extensions: Vec::new(),
            use_size_comparison: true,
            use_hash_comparison: true,
            use_resolution_comparison: false,
            use_image_similarity: false,
            use_video_similarity: false,
            use_audio_similarity: false,
            match_created_date: false,
            match_modified_date: false,
            keep_strategy: KeepStrategy::default(),
            image_similarity_threshold: 90,
            video_similarity_threshold: 85,
            audio_similarity_threshold: 90,
            thumbnail_edge_px: 256,
            parallel_threads: 0, // 0 = auto-detect
            adaptive_throttling: false,
            transcoder_path: None,
            prober_path: None,
        }
    }
}

/// Extensions accepted per kind when the extension filter is active.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "ico", "tiff", "tif", "heic", "heif", "raw",
    "cr2", "nef", "arw", "dng",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp", "vob", "ts",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aac", "ogg", "m4a", "wma", "aiff", "opus", "alac",
];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "txt", "md", "rtf",
    "csv", "epub",
];

impl ScanConfig {
    /// Load a scan profile from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scan profile: {}", path.display()))?;

        let config: ScanConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse scan profile: {}", path.display()))?;

        Ok(config)
    }

    /// The accepted extension set, or None when every file is accepted.
    pub fn extension_filter(&self) -> Option<HashSet<String>> {
        if self.scan_all_files {
            return None;
        }

        let mut set = HashSet::new();
        if self.include_images {
            set.extend(IMAGE_EXTENSIONS.iter().map(|s| s.to_string()));
        }
        if self.include_videos {
            set.extend(VIDEO_EXTENSIONS.iter().map(|s| s.to_string()));
        }
        if self.include_audio {
            set.extend(AUDIO_EXTENSIONS.iter().map(|s| s.to_string()));
        }
        if self.include_documents {
            set.extend(DOCUMENT_EXTENSIONS.iter().map(|s| s.to_string()));
        }
        set.extend(
            self.custom_extensions
                .iter()
                .map(|s| s.trim_start_matches('.').to_lowercase()),
        );

        Some(set)
    }

    /// Whether a file size passes the min/max filter.
    pub fn size_in_range(&self, size: u64) -> bool {
        if size < self.min_size {
            return false;
        }
        if self.max_size > 0 && size > self.max_size {
            return false;
        }
        true
    }

    /// Effective ceiling for CPU-bound workers.
    pub fn cpu_thread_ceiling(&self) -> usize {
        if self.parallel_threads == 0 {
            usize::MAX
        } else {
            self.parallel_threads
        }
    }

    /// True when any perceptual phase is enabled.
    pub fn any_perceptual(&self) -> bool {
        self.use_image_similarity || self.use_video_similarity || self.use_audio_similarity
    }

    /// Validate option combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            anyhow::bail!("at least one scan root is required");
        }
        if self.max_size > 0 && self.min_size > self.max_size {
            anyhow::bail!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size,
                self.max_size
            );
        }
        for threshold in [
            self.image_similarity_threshold,
            self.video_similarity_threshold,
            self.audio_similarity_threshold,
        ] {
            if threshold > 100 {
                anyhow::bail!("similarity thresholds are percentages (0-100)");
            }
        }
        if !self.use_size_comparison
            && !self.use_hash_comparison
            && !self.any_perceptual()
        {
            anyhow::bail!("every comparison phase is disabled; nothing to do");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_exact_only() {
        let config = ScanConfig::default();
        assert!(config.use_hash_comparison);
        assert!(!config.use_image_similarity);
        assert_eq!(config.image_similarity_threshold, 90);
    }

    #[test]
    fn test_extension_filter_respects_kind_flags() {
        let config = ScanConfig {
            include_audio: false,
            include_documents: false,
            ..Default::default()
        };

        let set = config.extension_filter().unwrap();
        assert!(set.contains("jpg"));
        assert!(set.contains("mp4"));
        assert!(!set.contains("mp3"));
        assert!(!set.contains("pdf"));
    }

    #[test]
    fn test_scan_all_files_disables_filter() {
        let config = ScanConfig {
            scan_all_files: true,
            ..Default::default()
        };
        assert!(config.extension_filter().is_none());
    }

    #[test]
    fn test_custom_extensions_are_normalized() {
        let config = ScanConfig {
            custom_extensions: vec![".PSD".to_string(), "xcf".to_string()],
            ..Default::default()
        };

        let set = config.extension_filter().unwrap();
        assert!(set.contains("psd"));
        assert!(set.contains("xcf"));
    }

    #[test]
    fn test_size_range() {
        let config = ScanConfig {
            min_size: 100,
            max_size: 1000,
            ..Default::default()
        };

        assert!(!config.size_in_range(99));
        assert!(config.size_in_range(100));
        assert!(config.size_in_range(1000));
        assert!(!config.size_in_range(1001));

        let unbounded = ScanConfig {
            min_size: 0,
            max_size: 0,
            ..Default::default()
        };
        assert!(unbounded.size_in_range(u64::MAX));
    }

    #[test]
    fn test_validate_rejects_empty_roots() {
        let config = ScanConfig::default();
        assert!(config.validate().is_err());

        let ok = ScanConfig {
            roots: vec![PathBuf::from("/tmp")],
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_size_range() {
        let config = ScanConfig {
            roots: vec![PathBuf::from("/tmp")],
            min_size: 10,
            max_size: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.toml");

        let config = ScanConfig {
            roots: vec![PathBuf::from("/photos")],
            use_image_similarity: true,
            image_similarity_threshold: 92,
            ..Default::default()
        };

        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ScanConfig::load_from(&path).unwrap();
        assert_eq!(loaded.roots, config.roots);
        assert!(loaded.use_image_similarity);
        assert_eq!(loaded.image_similarity_threshold, 92);
    }
}
