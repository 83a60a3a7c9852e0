//! DupSweep Engine Library
//!
//! Finds duplicate and near-duplicate media files across filesystem trees
//! through a multi-phase pipeline: enumerate, size/hash cascade, exact
//! grouping, perceptual compare, perceptual grouping.
//!
//! # Features
//!
//! - **Hash cascade**: size buckets -> XXH3 prefix hashes -> BLAKE3 full
//!   hashes, so expensive digests only touch plausible duplicates
//! - **Perceptual matching**: structural + chrominance dHash for images,
//!   keyframe-fused hashes for video, PCM fingerprints for audio
//! - **Durable caches**: hashes and thumbnails memoized by (path, size,
//!   mtime) in SQLite, invalidated on read when the file changed
//! - **Adaptive parallelism**: per-storage-medium I/O degrees, size-aware
//!   buckets, optional pressure throttling
//! - **Safe deletion**: policy-validated trash/permanent batches with
//!   dry-run, cooldown, and per-file outcome records
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use dupsweep::{ScanConfig, ScanOrchestrator};
//!
//! fn main() -> anyhow::Result<()> {
//!     let orchestrator = ScanOrchestrator::with_default_caches()?;
//!     let config = ScanConfig {
//!         roots: vec![PathBuf::from("/photos")],
//!         use_image_similarity: true,
//!         ..Default::default()
//!     };
//!
//!     let result = orchestrator.start(config)?;
//!     println!("{}", result.to_human_string());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod delete;
pub mod detect;
pub mod exec;
pub mod hash;
pub mod media;
pub mod orchestrator;
pub mod safety;
pub mod scanner;

// Re-export commonly used types
pub use cache::{HashCache, ThumbnailCache};
pub use config::ScanConfig;
pub use core::{
    DuplicateGroup, FileEntry, GroupKind, MediaKind, ScanPhase, ScanProgress, ScanResult,
};
pub use delete::{DeleteMode, DeleteOperationResult, DeleteService};
pub use detect::KeepStrategy;
pub use hash::HashService;
pub use media::MediaProcessor;
pub use orchestrator::{scan_async, EngineState, ScanControls, ScanOrchestrator};
pub use safety::{SafeDeleteOptions, SafeDeleteValidator};
pub use scanner::FileScanner;
