//! Safety module - delete validation policy
//!
//! Classifies every candidate path as allowed, warning, or blocked against
//! protected-path, protected-extension, and attribute policies, and decides
//! when a batch needs double confirmation. Blocked entries never reach the
//! destructive code path. Also owns the process-wide cooldown clock between
//! destructive batches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How protected extensions are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtensionPolicy {
    /// Protected extensions block deletion outright.
    Block,
    /// Protected extensions warn and force batch confirmation.
    #[default]
    Warn,
}

/// Delete-validation policy options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeDeleteOptions {
    /// Batch sizes at or above this file count need double confirmation
    pub double_confirm_file_count: usize,
    /// Batches at or above this aggregate size need double confirmation
    pub double_confirm_total_bytes: u64,
    /// Absolute folders no delete may touch
    pub protected_folders: Vec<PathBuf>,
    /// Glob patterns (matched against the whole path) no delete may touch
    pub protected_globs: Vec<String>,
    /// Protected extensions (lowercase, no dot)
    pub protected_extensions: HashSet<String>,
    pub extension_policy: ExtensionPolicy,
    /// Cooldown enforced between destructive batches
    pub cooldown_enabled: bool,
    pub cooldown_ms: u64,
    /// Permit deleting read-only files
    pub allow_readonly: bool,
    /// Warn when deleting hidden files
    pub warn_on_hidden: bool,
    /// Block files carrying the system attribute (or under system dirs)
    pub block_system_files: bool,
    /// Re-check existence just before deleting
    pub verify_exists: bool,
    /// Files above this size get a warning
    pub large_file_warning_bytes: u64,
    /// Concurrent deletions per batch
    pub max_concurrent_deletions: usize,
}

impl Default for SafeDeleteOptions {
    fn default() -> Self {
        Self {
            double_confirm_file_count: 10,
            double_confirm_total_bytes: 1024 * 1024 * 1024,
            protected_folders: Vec::new(),
            protected_globs: Vec::new(),
            protected_extensions: ["exe", "dll", "sys", "ini"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extension_policy: ExtensionPolicy::Warn,
            cooldown_enabled: true,
            cooldown_ms: 3_000,
            allow_readonly: false,
            warn_on_hidden: true,
            block_system_files: true,
            verify_exists: true,
            large_file_warning_bytes: 500 * 1024 * 1024,
            max_concurrent_deletions: 1,
        }
    }
}

/// Why a path may not be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    ProtectedFolder,
    ProtectedExtension,
    SystemFile,
    ReadOnly,
    Missing,
    InUse,
    AccessDenied,
}

/// Non-blocking concerns surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningReason {
    Hidden,
    ProtectedExtension,
    LargeFile,
    RecentlyModified,
}

/// Verdict for a single candidate path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathAssessment {
    pub path: PathBuf,
    pub size: u64,
    pub blocked: Option<BlockReason>,
    pub warnings: Vec<WarningReason>,
}

impl PathAssessment {
    pub fn is_allowed(&self) -> bool {
        self.blocked.is_none()
    }
}

/// Batch-level validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub assessments: Vec<PathAssessment>,
    /// The batch crosses a double-confirm threshold or carries protected
    /// extensions in warn mode
    pub needs_confirmation: bool,
    pub confirmation_reasons: Vec<String>,
}

impl ValidationReport {
    pub fn allowed(&self) -> impl Iterator<Item = &PathAssessment> {
        self.assessments.iter().filter(|a| a.is_allowed())
    }

    pub fn blocked(&self) -> impl Iterator<Item = &PathAssessment> {
        self.assessments.iter().filter(|a| !a.is_allowed())
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed().count()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked().count()
    }

    pub fn allowed_bytes(&self) -> u64 {
        self.allowed().map(|a| a.size).sum()
    }
}

struct PolicyState {
    options: SafeDeleteOptions,
    glob_set: GlobSet,
}

/// The delete gatekeeper. Policy mutations are available at runtime; the
/// cooldown deadline is shared process-wide through this instance.
pub struct SafeDeleteValidator {
    state: Mutex<PolicyState>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl SafeDeleteValidator {
    pub fn new(options: SafeDeleteOptions) -> Result<Self> {
        let glob_set = compile_globs(&options.protected_globs)?;
        Ok(Self {
            state: Mutex::new(PolicyState { options, glob_set }),
            cooldown_until: Mutex::new(None),
        })
    }

    /// Snapshot of the current options.
    pub fn options(&self) -> SafeDeleteOptions {
        self.state.lock().options.clone()
    }

    // -- runtime policy mutation ------------------------------------------

    pub fn add_protected_folder(&self, folder: PathBuf) {
        let mut state = self.state.lock();
        if !state.options.protected_folders.contains(&folder) {
            state.options.protected_folders.push(folder);
        }
    }

    pub fn remove_protected_folder(&self, folder: &Path) {
        let mut state = self.state.lock();
        state.options.protected_folders.retain(|f| f != folder);
    }

    pub fn add_protected_glob(&self, pattern: &str) -> Result<()> {
        let mut state = self.state.lock();
        let mut globs = state.options.protected_globs.clone();
        globs.push(pattern.to_string());
        state.glob_set = compile_globs(&globs)?;
        state.options.protected_globs = globs;
        Ok(())
    }

    pub fn add_protected_extension(&self, ext: &str) {
        let mut state = self.state.lock();
        state
            .options
            .protected_extensions
            .insert(ext.trim_start_matches('.').to_lowercase());
    }

    pub fn remove_protected_extension(&self, ext: &str) {
        let mut state = self.state.lock();
        state
            .options
            .protected_extensions
            .remove(&ext.trim_start_matches('.').to_lowercase());
    }

    // -- cooldown ---------------------------------------------------------

    /// Arm the cooldown clock; called after each destructive batch.
    pub fn start_cooldown(&self) {
        let state = self.state.lock();
        if !state.options.cooldown_enabled {
            return;
        }
        let deadline = Instant::now() + Duration::from_millis(state.options.cooldown_ms);
        *self.cooldown_until.lock() = Some(deadline);
    }

    pub fn is_cooldown_active(&self) -> bool {
        self.remaining_cooldown_ms() > 0
    }

    pub fn remaining_cooldown_ms(&self) -> u64 {
        self.cooldown_until
            .lock()
            .map(|deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64
            })
            .unwrap_or(0)
    }

    // -- classification ---------------------------------------------------

    /// Classify a single path against the policy.
    pub fn assess(&self, path: &Path) -> PathAssessment {
        let state = self.state.lock();
        let options = &state.options;

        let mut warnings = Vec::new();

        // Protected locations block regardless of file state.
        let inside_protected = options
            .protected_folders
            .iter()
            .any(|folder| path.starts_with(folder));
        if inside_protected || state.glob_set.is_match(path) {
            return PathAssessment {
                path: path.to_path_buf(),
                size: file_size(path),
                blocked: Some(BlockReason::ProtectedFolder),
                warnings,
            };
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if options.protected_extensions.contains(&ext) {
            match options.extension_policy {
                ExtensionPolicy::Block => {
                    return PathAssessment {
                        path: path.to_path_buf(),
                        size: file_size(path),
                        blocked: Some(BlockReason::ProtectedExtension),
                        warnings,
                    };
                }
                ExtensionPolicy::Warn => warnings.push(WarningReason::ProtectedExtension),
            }
        }

        // System locations are refused by path alone, before any
        // filesystem access.
        if options.block_system_files && is_system_path(path) {
            return PathAssessment {
                path: path.to_path_buf(),
                size: file_size(path),
                blocked: Some(BlockReason::SystemFile),
                warnings,
            };
        }

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return PathAssessment {
                    path: path.to_path_buf(),
                    size: 0,
                    blocked: Some(BlockReason::AccessDenied),
                    warnings,
                };
            }
            Err(_) => {
                let blocked = options.verify_exists.then_some(BlockReason::Missing);
                return PathAssessment {
                    path: path.to_path_buf(),
                    size: 0,
                    blocked,
                    warnings,
                };
            }
        };

        if options.block_system_files && has_system_attribute(&metadata) {
            return PathAssessment {
                path: path.to_path_buf(),
                size: metadata.len(),
                blocked: Some(BlockReason::SystemFile),
                warnings,
            };
        }

        if !options.allow_readonly && metadata.permissions().readonly() {
            return PathAssessment {
                path: path.to_path_buf(),
                size: metadata.len(),
                blocked: Some(BlockReason::ReadOnly),
                warnings,
            };
        }

        if is_in_use(path) {
            return PathAssessment {
                path: path.to_path_buf(),
                size: metadata.len(),
                blocked: Some(BlockReason::InUse),
                warnings,
            };
        }

        if options.warn_on_hidden && is_hidden_file(path, &metadata) {
            warnings.push(WarningReason::Hidden);
        }
        if metadata.len() >= options.large_file_warning_bytes {
            warnings.push(WarningReason::LargeFile);
        }
        if modified_within(&metadata, Duration::from_secs(24 * 3600)) {
            warnings.push(WarningReason::RecentlyModified);
        }

        PathAssessment {
            path: path.to_path_buf(),
            size: metadata.len(),
            blocked: None,
            warnings,
        }
    }

    /// Classify a batch and decide whether it needs double confirmation.
    pub fn validate_batch(&self, paths: &[PathBuf]) -> ValidationReport {
        let assessments: Vec<PathAssessment> = paths.iter().map(|p| self.assess(p)).collect();

        let options = self.state.lock().options.clone();
        // Thresholds judge the candidate set as submitted, blocked entries
        // included.
        let set_size = assessments.len();
        let set_bytes: u64 = assessments.iter().map(|a| a.size).sum();
        let protected_ext_warned = assessments
            .iter()
            .any(|a| a.warnings.contains(&WarningReason::ProtectedExtension));

        let mut reasons = Vec::new();
        if set_size >= options.double_confirm_file_count {
            reasons.push(format!(
                "{} files meets the double-confirm count threshold ({})",
                set_size, options.double_confirm_file_count
            ));
        }
        if set_bytes >= options.double_confirm_total_bytes {
            reasons.push(format!(
                "{} meets the double-confirm size threshold",
                humansize::format_size(set_bytes, humansize::BINARY)
            ));
        }
        if protected_ext_warned {
            reasons.push("batch contains protected extensions".to_string());
        }

        ValidationReport {
            assessments,
            needs_confirmation: !reasons.is_empty(),
            confirmation_reasons: reasons,
        }
    }
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("Invalid protected glob: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to compile protected globs")
}

fn file_size(path: &Path) -> u64 {
    std::fs::symlink_metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn modified_within(metadata: &std::fs::Metadata, window: Duration) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map(|age| age < window)
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_hidden_file(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_hidden_file(_path: &Path, metadata: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(unix)]
fn is_system_path(path: &Path) -> bool {
    const SYSTEM_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/boot", "/etc", "/usr/lib"];
    SYSTEM_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

#[cfg(windows)]
fn is_system_path(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    lower.starts_with("c:\\windows\\") || lower.starts_with("c:\\program files")
}

#[cfg(unix)]
fn has_system_attribute(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(windows)]
fn has_system_attribute(metadata: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    metadata.file_attributes() & FILE_ATTRIBUTE_SYSTEM != 0
}

/// Open the path with delete access and full sharing; sharing/access errors
/// mean another process holds it.
#[cfg(windows)]
fn is_in_use(path: &Path) -> bool {
    use std::fs::OpenOptions;
    use std::os::windows::fs::OpenOptionsExt;

    if !path.exists() {
        return false;
    }

    const FILE_SHARE_READ: u32 = 0x0000_0001;
    const FILE_SHARE_WRITE: u32 = 0x0000_0002;
    const FILE_SHARE_DELETE: u32 = 0x0000_0004;
    const DELETE: u32 = 0x0001_0000;

    let result = OpenOptions::new()
        .access_mode(DELETE)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE)
        .open(path);

    match result {
        Ok(_) => false,
        // ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        Err(e) => matches!(e.raw_os_error(), Some(5) | Some(32) | Some(33)),
    }
}

/// Unix file locks are advisory; locked files can still be unlinked.
#[cfg(not(windows))]
fn is_in_use(_path: &Path) -> bool {
    false
}
