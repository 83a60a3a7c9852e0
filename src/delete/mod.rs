//! Delete module - validated trash/permanent removal batches
//!
//! Every batch goes through the safe-delete validator first; blocked paths
//! land in the skipped set with their reason and never reach destructive
//! code. Supports dry-run, per-file outcome records, cancellation, and the
//! inter-batch cooldown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator::ScanControls;
use crate::safety::{BlockReason, SafeDeleteValidator};

/// What to do with validated paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Record what would happen without touching the filesystem
    DryRun,
    /// Move each file to the platform recycle bin
    Trash,
    /// Unlink each file permanently
    Permanent,
}

/// Progress event, one per processed file.
#[derive(Debug, Clone)]
pub struct DeleteProgress {
    pub session_id: Uuid,
    pub current_path: String,
    pub processed: usize,
    pub total: usize,
    pub freed_bytes: u64,
    pub is_cancelled: bool,
}

/// A successfully processed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedFile {
    pub path: PathBuf,
    pub size: u64,
    /// For dry runs, what would have happened
    pub mode: DeleteMode,
}

/// A file the batch could not process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDelete {
    pub path: PathBuf,
    pub error: String,
}

/// A file the validator refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDelete {
    pub path: PathBuf,
    pub reason: BlockReason,
}

/// Outcome of one delete session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOperationResult {
    pub session_id: Uuid,
    pub mode: DeleteMode,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub freed_bytes: u64,
    pub elapsed: Duration,
    pub deleted: Vec<DeletedFile>,
    pub failed: Vec<FailedDelete>,
    pub skipped: Vec<SkippedDelete>,
    pub cancelled: bool,
    /// The validator demanded double confirmation for this batch
    pub needed_confirmation: bool,
}

#[derive(Default)]
struct BatchState {
    deleted: Vec<DeletedFile>,
    failed: Vec<FailedDelete>,
    freed_bytes: u64,
    processed: usize,
    cancelled: bool,
}

/// Validated batch deletion executor.
#[derive(Clone)]
pub struct DeleteService {
    validator: Arc<SafeDeleteValidator>,
}

impl DeleteService {
    pub fn new(validator: Arc<SafeDeleteValidator>) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &SafeDeleteValidator {
        &self.validator
    }

    /// Validate and process a batch of paths.
    ///
    /// Emits one progress event per processed file. Cancellation stops the
    /// loop promptly; deletions already performed are not undone.
    pub fn execute<F>(
        &self,
        paths: &[PathBuf],
        mode: DeleteMode,
        controls: &ScanControls,
        progress: F,
    ) -> DeleteOperationResult
    where
        F: Fn(DeleteProgress) + Sync,
    {
        let session_id = Uuid::new_v4();
        let started = Instant::now();

        let report = self.validator.validate_batch(paths);

        let skipped: Vec<SkippedDelete> = report
            .blocked()
            .map(|a| SkippedDelete {
                path: a.path.clone(),
                reason: a.blocked.expect("blocked assessments carry a reason"),
            })
            .collect();

        let allowed: Vec<(PathBuf, u64)> = report
            .allowed()
            .map(|a| (a.path.clone(), a.size))
            .collect();

        // Respect any cooldown still running from the previous batch.
        let wait_ms = self.validator.remaining_cooldown_ms();
        if wait_ms > 0 && mode != DeleteMode::DryRun {
            tracing::info!("cooldown active; waiting {}ms", wait_ms);
            std::thread::sleep(Duration::from_millis(wait_ms));
        }

        let total = allowed.len();
        let degree = self.validator.options().max_concurrent_deletions.max(1);
        let state = Mutex::new(BatchState::default());

        let work = |path: PathBuf, size: u64| {
            if !controls.checkpoint() {
                state.lock().cancelled = true;
                return;
            }

            let outcome = process_one(&path, mode);
            let mut s = state.lock();
            match outcome {
                Ok(()) => {
                    s.freed_bytes += size;
                    s.deleted.push(DeletedFile {
                        path: path.clone(),
                        size,
                        mode,
                    });
                }
                Err(e) => {
                    tracing::warn!("delete failed for {}: {}", path.display(), e);
                    s.failed.push(FailedDelete {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
            s.processed += 1;
            progress(DeleteProgress {
                session_id,
                current_path: path.to_string_lossy().to_string(),
                processed: s.processed,
                total,
                freed_bytes: s.freed_bytes,
                is_cancelled: false,
            });
        };

        if degree == 1 {
            for (path, size) in allowed {
                if state.lock().cancelled {
                    break;
                }
                work(path, size);
            }
        } else {
            // One file at a time per worker, degree bounded by policy.
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(degree)
                .build()
                .ok();
            match pool {
                Some(pool) => pool.install(|| {
                    use rayon::prelude::*;
                    allowed.into_par_iter().for_each(|(path, size)| {
                        if !state.lock().cancelled {
                            work(path, size);
                        }
                    });
                }),
                None => {
                    for (path, size) in allowed {
                        if state.lock().cancelled {
                            break;
                        }
                        work(path, size);
                    }
                }
            }
        }

        let BatchState {
            deleted,
            failed,
            freed_bytes,
            cancelled,
            ..
        } = state.into_inner();

        if mode != DeleteMode::DryRun {
            self.validator.start_cooldown();
        }

        DeleteOperationResult {
            session_id,
            mode,
            success_count: deleted.len(),
            failed_count: failed.len(),
            skipped_count: skipped.len(),
            freed_bytes,
            elapsed: started.elapsed(),
            deleted,
            failed,
            skipped,
            cancelled,
            needed_confirmation: report.needs_confirmation,
        }
    }

    /// Async façade for the thread-based executor.
    pub async fn execute_async(
        self,
        paths: Vec<PathBuf>,
        mode: DeleteMode,
        controls: ScanControls,
    ) -> Result<DeleteOperationResult> {
        tokio::task::spawn_blocking(move || self.execute(&paths, mode, &controls, |_| {}))
            .await
            .map_err(|e| anyhow!("delete task panicked: {}", e))
    }
}

fn process_one(path: &Path, mode: DeleteMode) -> Result<()> {
    match mode {
        DeleteMode::DryRun => {
            tracing::info!("[dry run] would delete {}", path.display());
            Ok(())
        }
        DeleteMode::Trash => move_to_trash(path),
        DeleteMode::Permanent => {
            std::fs::remove_file(path)?;
            Ok(())
        }
    }
}

/// The trash crate can panic on some platforms when the shell state is
/// unexpected; contain that so one bad file doesn't abort the batch.
fn move_to_trash(path: &Path) -> Result<()> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| trash::delete(path))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!("trash failed: {}", e)),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("trash panicked: {}", msg))
        }
    }
}
