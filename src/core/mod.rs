//! Core module - shared data model for the scan engine
//!
//! File entries, duplicate groups, scan phases, and the progress/result
//! records exchanged between the orchestrator and its consumers.

mod entry;

pub use entry::{file_identity, FileEntry};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Media kind categories used for phase routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// Classify a file by its lowercase extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "ico" | "tiff" | "tif" | "heic"
            | "heif" | "raw" | "cr2" | "nef" | "arw" | "dng" => MediaKind::Image,

            "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" | "m4v" | "mpeg" | "mpg"
            | "3gp" | "vob" | "ts" => MediaKind::Video,

            "mp3" | "flac" | "wav" | "aac" | "ogg" | "m4a" | "wma" | "aiff" | "opus" | "alac" => {
                MediaKind::Audio
            }

            _ => MediaKind::Other,
        }
    }

    /// Kinds that can be decoded by the image pipeline.
    pub fn is_visual(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }
}

/// What a duplicate group is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    /// Byte-identical content (size + full hash)
    ExactMatch,
    /// Perceptually similar images (structural + chrominance hashes)
    SimilarImage,
    /// Perceptually similar videos (fused keyframe hashes)
    SimilarVideo,
    /// Similar audio fingerprints
    SimilarAudio,
}

/// A group of duplicate or near-duplicate files.
///
/// Members are ordered with the suggested keeper first; everything after it
/// counts toward `potential_savings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Stable group identifier
    pub id: Uuid,
    /// What kind of duplication this group represents
    pub kind: GroupKind,
    /// Match similarity 0-100 (exact = 100)
    pub similarity: u8,
    /// Group members, keeper first
    pub members: Vec<FileEntry>,
}

impl DuplicateGroup {
    pub fn new(kind: GroupKind, similarity: u8, members: Vec<FileEntry>) -> Self {
        debug_assert!(members.len() >= 2, "a duplicate group needs two members");
        Self {
            id: Uuid::new_v4(),
            kind,
            similarity,
            members,
        }
    }

    /// Number of files in the group.
    pub fn file_count(&self) -> usize {
        self.members.len()
    }

    /// Total bytes across all members.
    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }

    /// Bytes reclaimable by deleting everything except the keeper.
    pub fn potential_savings(&self) -> u64 {
        self.members.iter().skip(1).map(|m| m.size).sum()
    }
}

/// Pipeline phase reported through the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Initializing,
    Scanning,
    Hashing,
    Comparing,
    Completed,
    Cancelled,
    Error,
}

impl ScanPhase {
    /// Terminal phases never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanPhase::Completed | ScanPhase::Cancelled | ScanPhase::Error
        )
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanPhase::Initializing => "initializing",
            ScanPhase::Scanning => "scanning",
            ScanPhase::Hashing => "hashing",
            ScanPhase::Comparing => "comparing",
            ScanPhase::Completed => "completed",
            ScanPhase::Cancelled => "cancelled",
            ScanPhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Progress event emitted by the orchestrator.
///
/// `processed_files` is monotonically non-decreasing within a phase; phases
/// move strictly forward except into the terminal Cancelled/Error states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    /// File most recently touched by a worker (may lag)
    pub current_path: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub duplicate_groups: usize,
    pub potential_savings: u64,
    pub elapsed: Duration,
    pub is_paused: bool,
    pub is_cancelled: bool,
}

impl ScanProgress {
    pub fn at_phase(phase: ScanPhase) -> Self {
        Self {
            phase,
            current_path: String::new(),
            total_files: 0,
            processed_files: 0,
            duplicate_groups: 0,
            potential_savings: 0,
            elapsed: Duration::ZERO,
            is_paused: false,
            is_cancelled: false,
        }
    }
}

/// Final record produced by a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Terminal phase the scan landed in
    pub phase: ScanPhase,
    /// All duplicate groups found, exact groups first
    pub groups: Vec<DuplicateGroup>,
    /// Files that survived enumeration filters
    pub total_files_scanned: usize,
    /// Aggregate bytes across scanned files
    pub total_bytes_scanned: u64,
    /// Per-item failures absorbed during the scan (unreadable, undecodable)
    pub failed_files: usize,
    /// Wall-clock duration of the scan
    pub duration: Duration,
    /// Roots that were actually enumerated after coalescing
    pub roots: Vec<PathBuf>,
    pub generated_at: DateTime<Utc>,
}

impl ScanResult {
    /// True when the scan ran to completion (not cancelled, no fatal error).
    pub fn is_complete(&self) -> bool {
        self.phase == ScanPhase::Completed
    }

    /// Total reclaimable bytes across all groups.
    pub fn potential_savings(&self) -> u64 {
        self.groups.iter().map(|g| g.potential_savings()).sum()
    }

    /// Number of redundant copies (members beyond each keeper).
    pub fn duplicate_file_count(&self) -> usize {
        self.groups.iter().map(|g| g.file_count() - 1).sum()
    }

    /// Format as a human-readable summary.
    pub fn to_human_string(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "\n  DupSweep Scan Report\n  {}\n\n",
            "=".repeat(40)
        ));
        out.push_str(&format!(
            "  Scanned:           {} files ({})\n",
            self.total_files_scanned,
            humansize::format_size(self.total_bytes_scanned, humansize::BINARY)
        ));
        out.push_str(&format!("  Duplicate groups:  {}\n", self.groups.len()));
        out.push_str(&format!(
            "  Redundant copies:  {}\n",
            self.duplicate_file_count()
        ));
        out.push_str(&format!(
            "  Reclaimable:       {}\n",
            humansize::format_size(self.potential_savings(), humansize::BINARY)
        ));
        if self.failed_files > 0 {
            out.push_str(&format!("  Failed items:      {}\n", self.failed_files));
        }
        out.push_str(&format!(
            "  Finished:          {} ({})\n\n",
            self.phase,
            humantime::format_duration(std::time::Duration::from_secs(self.duration.as_secs()))
        ));

        for (i, group) in self.groups.iter().enumerate() {
            let kind = match group.kind {
                GroupKind::ExactMatch => "EXACT",
                GroupKind::SimilarImage => "IMAGE",
                GroupKind::SimilarVideo => "VIDEO",
                GroupKind::SimilarAudio => "AUDIO",
            };
            out.push_str(&format!(
                "  Group #{} [{}] ({}% similar, {} reclaimable)\n",
                i + 1,
                kind,
                group.similarity,
                humansize::format_size(group.potential_savings(), humansize::BINARY)
            ));
            for (j, member) in group.members.iter().enumerate() {
                let tag = if j == 0 { "KEEP " } else { "DUPE " };
                out.push_str(&format!("    {} {}\n", tag, member.path.display()));
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            size,
            kind: MediaKind::Other,
            extension: "bin".to_string(),
            created: None,
            modified: None,
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

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("jpg"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("MKV"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("flac"), MediaKind::Audio);
        assert_eq!(MediaKind::from_extension("pdf"), MediaKind::Other);
        assert_eq!(MediaKind::from_extension(""), MediaKind::Other);
    }

    #[test]
    fn test_group_savings_exclude_keeper() {
        let group = DuplicateGroup::new(
            GroupKind::ExactMatch,
            100,
            vec![
                make_entry("/a/keep.bin", 4096),
                make_entry("/b/dupe1.bin", 4096),
                make_entry("/c/dupe2.bin", 4096),
            ],
        );

        assert_eq!(group.file_count(), 3);
        assert_eq!(group.total_size(), 3 * 4096);
        assert_eq!(group.potential_savings(), 2 * 4096);
    }

    #[test]
    fn test_phase_terminality() {
        assert!(ScanPhase::Completed.is_terminal());
        assert!(ScanPhase::Cancelled.is_terminal());
        assert!(ScanPhase::Error.is_terminal());
        assert!(!ScanPhase::Hashing.is_terminal());
    }

    #[test]
    fn test_result_human_string() {
        let result = ScanResult {
            phase: ScanPhase::Completed,
            groups: vec![DuplicateGroup::new(
                GroupKind::ExactMatch,
                100,
                vec![make_entry("/x/a.bin", 100), make_entry("/y/b.bin", 100)],
            )],
            total_files_scanned: 10,
            total_bytes_scanned: 1000,
            failed_files: 0,
            duration: Duration::from_secs(1),
            roots: vec![PathBuf::from("/x")],
            generated_at: Utc::now(),
        };

        let text = result.to_human_string();
        assert!(text.contains("10 files"));
        assert!(text.contains("EXACT"));
        assert!(text.contains("KEEP"));
        assert_eq!(result.potential_savings(), 100);
    }
}
