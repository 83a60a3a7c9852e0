//! CLI module - command line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// DupSweep - find and reclaim space from duplicate media files
///
/// Scans one or more directory trees through a size/hash cascade plus
/// optional perceptual matching, then reports reviewable duplicate groups.
/// Deletion always runs through the safety validator.
#[derive(Parser, Debug)]
#[command(name = "dupsweep")]
#[command(author = "Ryan Cashmoney <tunclon@proton.me>")]
#[command(version)]
#[command(about = "Duplicate and near-duplicate media finder", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan directories for duplicate files
    Scan(ScanArgs),

    /// Validate and delete a list of files (trash by default)
    Delete(DeleteArgs),

    /// Inspect or clear the hash/thumbnail caches
    Cache(CacheArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct ScanArgs {
    /// Directories to scan
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,

    /// Load a scan profile (TOML) before applying flags
    #[arg(long, short)]
    pub profile: Option<PathBuf>,

    /// Scan every file, not just recognized media kinds
    #[arg(long, short)]
    pub all_files: bool,

    /// Include hidden files and directories
    #[arg(long)]
    pub include_hidden: bool,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recurse: bool,

    /// Minimum file size in bytes
    #[arg(long, default_value = "1")]
    pub min_size: u64,

    /// Maximum file size in bytes (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub max_size: u64,

    /// Enable perceptual image matching
    #[arg(long)]
    pub images: bool,

    /// Enable perceptual video matching (needs ffmpeg/ffprobe)
    #[arg(long)]
    pub videos: bool,

    /// Enable audio fingerprint matching (needs ffmpeg)
    #[arg(long)]
    pub audio: bool,

    /// Similarity threshold percent for perceptual matches
    #[arg(long, default_value = "90")]
    pub threshold: u8,

    /// Keeper selection: newest, oldest, resolution, cleanest
    #[arg(long, value_enum, default_value = "newest")]
    pub keep: KeepArg,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(long, short, default_value = "0")]
    pub workers: usize,

    /// Throttle workers under CPU/memory pressure
    #[arg(long)]
    pub throttle: bool,

    /// Output format for the report
    #[arg(long, value_enum, default_value = "human")]
    pub report: ReportFormat,
}

#[derive(Debug, Clone, Parser)]
pub struct DeleteArgs {
    /// Files to delete
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Dry run - validate and report without touching anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Unlink permanently instead of using the recycle bin
    #[arg(long)]
    pub permanent: bool,

    /// Skip the double-confirmation prompt
    #[arg(long, short)]
    pub yes: bool,

    /// Extra protected folder (repeatable)
    #[arg(long)]
    pub protect: Vec<PathBuf>,

    /// Output format for the result
    #[arg(long, value_enum, default_value = "human")]
    pub report: ReportFormat,
}

#[derive(Debug, Clone, Parser)]
pub struct CacheArgs {
    /// Drop every cached hash and thumbnail
    #[arg(long)]
    pub clear: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    /// Human readable (default)
    Human,
    /// JSON output
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KeepArg {
    /// Keep the most recently modified file
    Newest,
    /// Keep the oldest file
    Oldest,
    /// Keep the highest-resolution file
    Resolution,
    /// Keep the file with the cleanest name
    Cleanest,
}
