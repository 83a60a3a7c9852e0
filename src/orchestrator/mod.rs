//! Orchestrator module - the multi-phase scan state machine
//!
//! Drives enumerate -> (optional) resolution extract -> size/hash cascade ->
//! exact grouping -> perceptual compare -> perceptual grouping, fanning each
//! phase out through the parallel executor with a strict barrier between
//! phases. Owns the pause latch, the cancellation signal, and the progress
//! stream.

pub mod control;

pub use control::ScanControls;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::cache::{HashCache, ThumbnailCache};
use crate::config::ScanConfig;
use crate::core::{DuplicateGroup, FileEntry, MediaKind, ScanPhase, ScanProgress, ScanResult};
use crate::detect::{self, DetectOptions, PerceptualKind};
use crate::exec::ParallelExecutor;
use crate::hash::HashService;
use crate::media::MediaProcessor;
use crate::scanner::{normalize_roots, FileScanner};

/// Progress channel capacity; emission is best-effort beyond this.
const PROGRESS_BUFFER: usize = 256;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    /// A fatal invariant violation; reset() is required before new work.
    Error,
}

/// State-machine violations surfaced to the caller.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("engine is in the error state; reset() it first")]
    Errored,
}

// ---------------------------------------------------------------------------
// Progress emission
// ---------------------------------------------------------------------------

struct ProgressEmitter {
    tx: Option<Sender<ScanProgress>>,
    controls: ScanControls,
    started: Instant,
    phase: Mutex<ScanPhase>,
    current_path: Mutex<String>,
    total: AtomicUsize,
    processed: AtomicUsize,
    groups: AtomicUsize,
    savings: AtomicU64,
    cadence: AtomicUsize,
}

impl ProgressEmitter {
    fn new(tx: Option<Sender<ScanProgress>>, controls: ScanControls) -> Self {
        Self {
            tx,
            controls,
            started: Instant::now(),
            phase: Mutex::new(ScanPhase::Initializing),
            current_path: Mutex::new(String::new()),
            total: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            groups: AtomicUsize::new(0),
            savings: AtomicU64::new(0),
            cadence: AtomicUsize::new(10),
        }
    }

    /// Enter a phase: reset the per-phase counters and emit one tick.
    fn begin_phase(&self, phase: ScanPhase, total: usize) {
        *self.phase.lock() = phase;
        self.total.store(total, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.cadence
            .store((total / 100).max(10), Ordering::Relaxed);
        tracing::info!("phase {} ({} items)", phase, total);
        self.emit();
    }

    /// Count one processed item, emitting on the phase cadence.
    fn item(&self, path: &std::path::Path) {
        let done = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        *self.current_path.lock() = path.to_string_lossy().to_string();
        if done % self.cadence.load(Ordering::Relaxed) == 0 {
            self.emit();
        }
    }

    fn record_groups(&self, groups: &[DuplicateGroup]) {
        self.groups.fetch_add(groups.len(), Ordering::Relaxed);
        let savings: u64 = groups.iter().map(|g| g.potential_savings()).sum();
        self.savings.fetch_add(savings, Ordering::Relaxed);
    }

    /// Best-effort emission: a slow or absent subscriber never blocks
    /// workers.
    fn emit(&self) {
        let Some(ref tx) = self.tx else {
            return;
        };
        let progress = ScanProgress {
            phase: *self.phase.lock(),
            current_path: self.current_path.lock().clone(),
            total_files: self.total.load(Ordering::Relaxed),
            processed_files: self.processed.load(Ordering::Relaxed),
            duplicate_groups: self.groups.load(Ordering::Relaxed),
            potential_savings: self.savings.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            is_paused: self.controls.is_paused(),
            is_cancelled: self.controls.is_cancelled(),
        };
        let _ = tx.try_send(progress);
    }

    fn emit_terminal(&self, phase: ScanPhase) {
        *self.phase.lock() = phase;
        self.emit();
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The scan engine entry point.
///
/// State machine: Idle -> Running <-> Paused -> terminal; Completed and
/// Cancelled reset to Idle on return, Error sticks until `reset()`.
pub struct ScanOrchestrator {
    state: Mutex<EngineState>,
    controls: Mutex<ScanControls>,
    hash_cache: Arc<HashCache>,
    thumbnail_cache: Arc<ThumbnailCache>,
    progress_tx: Mutex<Option<Sender<ScanProgress>>>,
}

impl ScanOrchestrator {
    pub fn new(hash_cache: Arc<HashCache>, thumbnail_cache: Arc<ThumbnailCache>) -> Self {
        Self {
            state: Mutex::new(EngineState::Idle),
            controls: Mutex::new(ScanControls::new()),
            hash_cache,
            thumbnail_cache,
            progress_tx: Mutex::new(None),
        }
    }

    /// Orchestrator backed by the default on-disk caches.
    pub fn with_default_caches() -> Result<Self> {
        Ok(Self::new(
            Arc::new(HashCache::open_default().context("Failed to open hash cache")?),
            Arc::new(ThumbnailCache::open_default().context("Failed to open thumbnail cache")?),
        ))
    }

    /// Orchestrator backed by throwaway in-memory caches.
    pub fn with_memory_caches() -> Result<Self> {
        Ok(Self::new(
            Arc::new(HashCache::in_memory()?),
            Arc::new(ThumbnailCache::in_memory()?),
        ))
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Subscribe to the progress stream. Single consumer; a later call
    /// replaces the earlier subscription.
    pub fn subscribe(&self) -> Receiver<ScanProgress> {
        let (tx, rx) = bounded(PROGRESS_BUFFER);
        *self.progress_tx.lock() = Some(tx);
        rx
    }

    /// Close the pause latch; workers stop before their next item.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::Running {
            self.controls.lock().pause();
            *state = EngineState::Paused;
            tracing::info!("scan paused");
        }
    }

    /// Re-open the pause latch.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::Paused {
            self.controls.lock().resume();
            *state = EngineState::Running;
            tracing::info!("scan resumed");
        }
    }

    /// Signal cancellation to every in-flight worker.
    pub fn cancel(&self) {
        let state = self.state.lock();
        if matches!(*state, EngineState::Running | EngineState::Paused) {
            self.controls.lock().cancel();
            tracing::info!("scan cancelled");
        }
    }

    /// Leave the Error state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::Error {
            *state = EngineState::Idle;
        }
    }

    /// Run a scan to completion (blocking). Rejects when not Idle.
    pub fn start(&self, config: ScanConfig) -> Result<ScanResult> {
        config.validate()?;

        let controls = {
            let mut state = self.state.lock();
            match *state {
                EngineState::Idle => {}
                EngineState::Error => return Err(StateError::Errored.into()),
                _ => return Err(StateError::AlreadyRunning.into()),
            }
            *state = EngineState::Running;

            // Fresh controls per scan; cancellation is single-shot.
            let controls = ScanControls::new();
            *self.controls.lock() = controls.clone();
            controls
        };

        let emitter = ProgressEmitter::new(self.progress_tx.lock().clone(), controls.clone());
        let outcome = self.run_scan(&config, &controls, &emitter);

        let mut state = self.state.lock();
        match &outcome {
            Ok(result) => {
                emitter.emit_terminal(result.phase);
                *state = EngineState::Idle;
            }
            Err(e) => {
                tracing::error!("scan failed: {}", e);
                emitter.emit_terminal(ScanPhase::Error);
                *state = EngineState::Error;
            }
        }

        outcome
    }

    // -- phase driver ------------------------------------------------------

    fn run_scan(
        &self,
        config: &ScanConfig,
        controls: &ScanControls,
        emitter: &ProgressEmitter,
    ) -> Result<ScanResult> {
        let started = Instant::now();
        let executor = ParallelExecutor::new(config);
        let hash_service = HashService::new(Arc::clone(&self.hash_cache));
        let media = MediaProcessor::new(config, Arc::clone(&self.thumbnail_cache));
        let failed = AtomicUsize::new(0);

        let roots = normalize_roots(&config.roots);

        // Phase 1: a single tick with zero counters.
        emitter.begin_phase(ScanPhase::Initializing, 0);

        // Phase 2: enumerate.
        emitter.begin_phase(ScanPhase::Scanning, 0);
        let scanner = FileScanner::new(config, controls.clone());
        let mut entries = scanner.scan(|entry| emitter.item(&entry.path));

        let total_files = entries.len();
        let total_bytes: u64 = entries.iter().map(|e| e.size).sum();
        emitter.total.store(total_files, Ordering::Relaxed);
        emitter.emit();

        let finish = |phase: ScanPhase, groups: Vec<DuplicateGroup>| ScanResult {
            phase,
            groups,
            total_files_scanned: total_files,
            total_bytes_scanned: total_bytes,
            failed_files: failed.load(Ordering::Relaxed),
            duration: started.elapsed(),
            roots: roots.clone(),
            generated_at: Utc::now(),
        };

        if controls.is_cancelled() {
            return Ok(finish(ScanPhase::Cancelled, Vec::new()));
        }

        // Mixed roots share worker pools; the most conservative medium
        // picks the I/O degree.
        let io_root = roots
            .iter()
            .min_by_key(|root| executor.io_degree(root))
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));

        let detect_options = DetectOptions {
            match_created_date: config.match_created_date,
            match_modified_date: config.match_modified_date,
            keep: config.keep_strategy,
        };

        // Phase 3: resolution extraction.
        if config.use_resolution_comparison {
            let mut visual: Vec<&mut FileEntry> = entries
                .iter_mut()
                .filter(|e| e.kind.is_visual())
                .collect();
            emitter.begin_phase(ScanPhase::Scanning, visual.len());
            executor.for_each_cpu(&mut visual, controls, |entry| {
                if let Some((w, h)) = media.resolution(entry) {
                    entry.width = Some(w);
                    entry.height = Some(h);
                }
                emitter.item(&entry.path);
            });
            emitter.emit();

            if controls.is_cancelled() {
                return Ok(finish(ScanPhase::Cancelled, Vec::new()));
            }
        }

        let mut groups: Vec<DuplicateGroup> = Vec::new();

        // Phase 4: size/hash cascade.
        if config.use_size_comparison || config.use_hash_comparison {
            let cascade_groups = self.run_cascade(
                config,
                controls,
                emitter,
                &executor,
                &hash_service,
                &io_root,
                &mut entries,
                &detect_options,
                &failed,
            )?;
            emitter.record_groups(&cascade_groups);
            groups.extend(cascade_groups);

            if controls.is_cancelled() {
                return Ok(finish(ScanPhase::Cancelled, groups));
            }
        }

        // Exact matches win: their members never enter perceptual phases.
        let claimed: HashSet<PathBuf> = groups
            .iter()
            .flat_map(|g| g.members.iter().map(|m| m.path.clone()))
            .collect();

        // Phases 5-7: perceptual comparison per media kind.
        let perceptual_plan: [(bool, MediaKind, PerceptualKind, u8); 3] = [
            (
                config.use_image_similarity,
                MediaKind::Image,
                PerceptualKind::Image,
                config.image_similarity_threshold,
            ),
            (
                config.use_video_similarity && media.tools().video_capable(),
                MediaKind::Video,
                PerceptualKind::Video,
                config.video_similarity_threshold,
            ),
            (
                config.use_audio_similarity && media.tools().audio_capable(),
                MediaKind::Audio,
                PerceptualKind::Audio,
                config.audio_similarity_threshold,
            ),
        ];

        if config.use_video_similarity && !media.tools().video_capable() {
            tracing::warn!("video similarity requested but transcoder/prober unavailable; skipping");
        }
        if config.use_audio_similarity && !media.tools().audio_capable() {
            tracing::warn!("audio similarity requested but transcoder unavailable; skipping");
        }

        for (enabled, media_kind, perceptual_kind, threshold) in perceptual_plan {
            if !enabled {
                continue;
            }

            let mut candidates: Vec<&mut FileEntry> = entries
                .iter_mut()
                .filter(|e| e.kind == media_kind && !claimed.contains(&e.path))
                .collect();

            emitter.begin_phase(ScanPhase::Comparing, candidates.len());
            executor.for_each_cpu(&mut candidates, controls, |entry| {
                match perceptual_kind {
                    PerceptualKind::Image => {
                        if let Some(desc) = media.image_descriptors(entry) {
                            entry.perceptual_hash = Some(desc.structural);
                            entry.color_hash = Some(desc.chroma);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    PerceptualKind::Video => {
                        if let Some(hash) = media.video_hash(entry) {
                            entry.perceptual_hash = Some(hash);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    PerceptualKind::Audio => {
                        if let Some(fp) = media.audio_fingerprint(entry) {
                            entry.audio_fingerprint = Some(fp);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                emitter.item(&entry.path);
            });
            emitter.emit();

            if controls.is_cancelled() {
                return Ok(finish(ScanPhase::Cancelled, groups));
            }

            let snapshot: Vec<FileEntry> = candidates.iter().map(|e| (**e).clone()).collect();
            let found = detect::find_perceptual_groups(
                snapshot,
                perceptual_kind,
                threshold,
                &detect_options,
            );
            emitter.record_groups(&found);
            groups.extend(found);
        }

        // Warm the thumbnail cache for everything a reviewer will look at.
        self.warm_thumbnails(&media, &executor, controls, &mut groups);

        Ok(finish(ScanPhase::Completed, groups))
    }

    /// Phase 4: bucket by size (and configured equivalences), promote
    /// survivors through quick hashes, then full hashes, then exact
    /// grouping.
    #[allow(clippy::too_many_arguments)]
    fn run_cascade(
        &self,
        config: &ScanConfig,
        controls: &ScanControls,
        emitter: &ProgressEmitter,
        executor: &ParallelExecutor,
        hash_service: &HashService,
        io_root: &std::path::Path,
        entries: &mut [FileEntry],
        detect_options: &DetectOptions,
        failed: &AtomicUsize,
    ) -> Result<Vec<DuplicateGroup>> {
        type CascadeKey = (u64, Option<(u32, u32)>, Option<NaiveDate>, Option<NaiveDate>);

        let key_of = |entry: &FileEntry| -> CascadeKey {
            (
                entry.size,
                config
                    .use_resolution_comparison
                    .then(|| entry.width.zip(entry.height))
                    .flatten(),
                config
                    .match_created_date
                    .then(|| entry.created_day())
                    .flatten(),
                config
                    .match_modified_date
                    .then(|| entry.modified_day())
                    .flatten(),
            )
        };

        // 4a. Size buckets; only buckets with 2+ members go on.
        let mut buckets: HashMap<CascadeKey, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            buckets.entry(key_of(entry)).or_default().push(i);
        }
        let survivor_set: HashSet<usize> = buckets
            .into_values()
            .filter(|bucket| bucket.len() >= 2)
            .flatten()
            .collect();

        if survivor_set.is_empty() {
            emitter.begin_phase(ScanPhase::Hashing, 0);
            return Ok(Vec::new());
        }

        // Without hashing, the configured equivalence set is the grouping.
        if !config.use_hash_comparison {
            emitter.begin_phase(ScanPhase::Hashing, 0);
            let bucketed: Vec<FileEntry> = entries
                .iter()
                .enumerate()
                .filter(|(i, _)| survivor_set.contains(i))
                .map(|(_, e)| e.clone())
                .collect();
            return Ok(detect::find_equivalence_groups(
                bucketed,
                detect_options,
                config.use_resolution_comparison,
            ));
        }

        // 4b. Quick hashes in parallel over the size-bucket survivors.
        let mut survivors: Vec<&mut FileEntry> = entries
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| survivor_set.contains(i))
            .map(|(_, e)| e)
            .collect();

        emitter.begin_phase(ScanPhase::Hashing, survivors.len());
        executor.for_each_io(io_root, &mut survivors, controls, |entry| {
            // Zero-size files carry no content to hash.
            if entry.size > 0 {
                match hash_service.quick_hash(entry) {
                    Ok(hash) => entry.quick_hash = Some(hash),
                    Err(e) => {
                        tracing::warn!("quick hash failed for {}: {}", entry.path.display(), e);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            emitter.item(&entry.path);
        });
        drop(survivors);
        emitter.emit();

        if controls.is_cancelled() {
            return Ok(Vec::new());
        }

        // Re-bucket by (cascade key, quick hash); drop singletons and
        // entries whose quick hash failed.
        type QuickKey = (CascadeKey, Option<String>);
        let mut quick_buckets: HashMap<QuickKey, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if !survivor_set.contains(&i) {
                continue;
            }
            if entry.size > 0 && entry.quick_hash.is_none() {
                continue;
            }
            quick_buckets
                .entry((key_of(entry), entry.quick_hash.clone()))
                .or_default()
                .push(i);
        }

        let mut zero_size_groups: Vec<DuplicateGroup> = Vec::new();
        let mut full_set: HashSet<usize> = HashSet::new();
        for ((key, _), bucket) in quick_buckets {
            if bucket.len() < 2 {
                continue;
            }
            if key.0 == 0 {
                // Zero-size files are trivially byte-identical; no digest
                // exists or is needed.
                let members: Vec<FileEntry> =
                    bucket.iter().map(|&i| entries[i].clone()).collect();
                zero_size_groups.push(DuplicateGroup::new(
                    crate::core::GroupKind::ExactMatch,
                    100,
                    members,
                ));
            } else {
                full_set.extend(bucket);
            }
        }

        // 4c. Full hashes over the remaining candidates, size-aware.
        let mut finalists: Vec<&mut FileEntry> = entries
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| full_set.contains(i))
            .map(|(_, e)| e)
            .collect();

        emitter.begin_phase(ScanPhase::Hashing, finalists.len());
        executor.for_each_sized(
            io_root,
            &mut finalists,
            |entry| entry.size,
            controls,
            |entry| {
                match hash_service.full_hash(entry, controls) {
                    Ok(Some(hash)) => entry.full_hash = Some(hash),
                    Ok(None) => {} // cancelled mid-stream
                    Err(e) => {
                        tracing::warn!("full hash failed for {}: {}", entry.path.display(), e);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                emitter.item(&entry.path);
            },
        );
        drop(finalists);
        emitter.emit();

        if controls.is_cancelled() {
            return Ok(Vec::new());
        }

        let hashed: Vec<FileEntry> = entries
            .iter()
            .enumerate()
            .filter(|(i, e)| full_set.contains(i) && e.full_hash.is_some())
            .map(|(_, e)| e.clone())
            .collect();

        let mut groups = detect::find_exact_groups(hashed, detect_options);
        groups.extend(zero_size_groups);
        Ok(groups)
    }

    /// Render (or re-validate) cached thumbnails for group members so the
    /// review UI is instant. Failures only cost the thumbnail.
    fn warm_thumbnails(
        &self,
        media: &MediaProcessor,
        executor: &ParallelExecutor,
        controls: &ScanControls,
        groups: &mut [DuplicateGroup],
    ) {
        let mut members: Vec<&mut FileEntry> = groups
            .iter_mut()
            .flat_map(|g| g.members.iter_mut())
            .filter(|m| m.kind.is_visual())
            .collect();

        if members.is_empty() {
            return;
        }

        executor.for_each_cpu(&mut members, controls, |entry| {
            if media.thumbnail(entry).is_some() {
                entry.thumbnail_cached = true;
            }
        });
    }
}

/// Async façade: run a scan on the blocking pool (the engine itself is
/// thread-based).
pub async fn scan_async(
    orchestrator: Arc<ScanOrchestrator>,
    config: ScanConfig,
) -> Result<ScanResult> {
    tokio::task::spawn_blocking(move || orchestrator.start(config))
        .await
        .context("scan task panicked")?
}
