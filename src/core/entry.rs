//! FileEntry - the unit of work flowing through the scan pipeline
//!
//! Created by the scanner at enumeration; later phases only add derived
//! attributes (hashes, descriptors, resolution), never rewrite earlier ones.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::MediaKind;

/// A single candidate file discovered by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Classified media kind
    pub kind: MediaKind,
    /// File extension (lowercase, no dot)
    pub extension: String,
    /// Creation time (if the filesystem reports one)
    pub created: Option<DateTime<Utc>>,
    /// Last modified time
    pub modified: Option<DateTime<Utc>>,
    /// Image/video width in pixels (resolution phase)
    pub width: Option<u32>,
    /// Image/video height in pixels (resolution phase)
    pub height: Option<u32>,
    /// XXH3-128 digest of the first 64 KiB (lowercase hex)
    pub quick_hash: Option<String>,
    /// BLAKE3 digest of the whole file (lowercase hex)
    pub full_hash: Option<String>,
    /// 64-bit structural difference hash (images, fused keyframes for video)
    pub perceptual_hash: Option<u64>,
    /// 64-bit chrominance difference hash (images only)
    pub color_hash: Option<u64>,
    /// 64-bit PCM fingerprint (audio only)
    pub audio_fingerprint: Option<u64>,
    /// Rendered thumbnail bytes (JPEG), not serialized into reports
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
    /// True when a thumbnail for this path is present in the thumbnail cache
    #[serde(default)]
    pub thumbnail_cached: bool,
}

impl FileEntry {
    /// Build an entry from a path and its metadata.
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let kind = MediaKind::from_extension(&extension);
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let created = metadata.created().ok().map(DateTime::<Utc>::from);

        Self {
            path,
            size: metadata.len(),
            kind,
            extension,
            created,
            modified,
            width: None,
            height: None,
            quick_hash: None,
            full_hash: None,
            perceptual_hash: None,
            color_hash: None,
            audio_fingerprint: None,
            thumbnail: None,
            thumbnail_cached: false,
        }
    }

    /// Display name (filename only).
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// Parent directory of the file.
    pub fn parent_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Modification time as integer ticks (nanoseconds since the Unix
    /// epoch), the unit used for cache invalidation keys.
    pub fn mtime_ticks(&self) -> i64 {
        self.modified
            .map(|m| m.timestamp_nanos_opt().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Creation date at day granularity (date-match constraint).
    pub fn created_day(&self) -> Option<NaiveDate> {
        self.created.map(|d| d.date_naive())
    }

    /// Modification date at day granularity (date-match constraint).
    pub fn modified_day(&self) -> Option<NaiveDate> {
        self.modified.map(|d| d.date_naive())
    }

    /// Total pixel count, when the resolution is known.
    pub fn pixel_count(&self) -> Option<u64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w as u64 * h as u64),
            _ => None,
        }
    }
}

/// Read the current (size, mtime_ticks) identity of a file on disk.
///
/// Used to decide whether a cache record is still valid.
pub fn file_identity(path: &Path) -> std::io::Result<(u64, i64)> {
    let metadata = std::fs::metadata(path)?;
    let ticks = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok((metadata.len(), ticks))
}
