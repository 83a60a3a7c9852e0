//! Exec module - bounded, adaptive parallelism for pipeline phases
//!
//! Three modes: CPU-bound (cores - 1, capped by config), I/O-bound (degree
//! from the storage medium under the root), and file-size-aware (large
//! files get their own narrower bucket to bound peak memory). Workers may
//! additionally be throttled when CPU or memory pressure is high.

pub mod storage;

use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::System;

pub use storage::{StorageClassifier, StorageMedium};

use crate::config::ScanConfig;
use crate::orchestrator::ScanControls;

/// Size bucket boundaries for file-size-aware scheduling.
const SMALL_FILE_BYTES: u64 = 10 * 1024 * 1024;
const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Concurrent large-file workers, bounding peak buffer memory.
const LARGE_FILES_DEGREE: usize = 2;

const CPU_PRESSURE_THRESHOLD: f32 = 80.0;
const MEMORY_PRESSURE_THRESHOLD: f32 = 70.0;
const PRESSURE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const THROTTLE_SLEEP: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Resource pressure sampling
// ---------------------------------------------------------------------------

struct MonitorState {
    system: System,
    sampled_at: Option<Instant>,
    cpu_percent: f32,
    memory_percent: f32,
}

/// Samples CPU and memory pressure, caching readings for a short interval
/// so per-item checks stay cheap.
pub struct ResourceMonitor {
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                system: System::new(),
                sampled_at: None,
                cpu_percent: 0.0,
                memory_percent: 0.0,
            }),
        }
    }

    /// True when either CPU or memory exceeds its pressure threshold.
    pub fn pressured(&self) -> bool {
        let mut state = self.state.lock();

        let stale = state
            .sampled_at
            .map(|at| at.elapsed() >= PRESSURE_SAMPLE_INTERVAL)
            .unwrap_or(true);
        if stale {
            state.system.refresh_cpu_usage();
            state.system.refresh_memory();
            state.cpu_percent = state.system.global_cpu_usage();
            let total = state.system.total_memory();
            state.memory_percent = if total > 0 {
                state.system.used_memory() as f32 / total as f32 * 100.0
            } else {
                0.0
            };
            state.sampled_at = Some(Instant::now());
        }

        state.cpu_percent > CPU_PRESSURE_THRESHOLD
            || state.memory_percent > MEMORY_PRESSURE_THRESHOLD
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Per-scan parallelism coordinator.
pub struct ParallelExecutor {
    cpu_ceiling: usize,
    classifier: StorageClassifier,
    monitor: Option<ResourceMonitor>,
}

impl ParallelExecutor {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            cpu_ceiling: config.cpu_thread_ceiling(),
            classifier: StorageClassifier::new(),
            monitor: config.adaptive_throttling.then(ResourceMonitor::new),
        }
    }

    /// CPU-bound degree: processor count minus one, capped by config.
    pub fn cpu_degree(&self) -> usize {
        let nominal = num_cpus::get().saturating_sub(1).max(1);
        self.effective(nominal.min(self.cpu_ceiling))
    }

    /// I/O-bound degree for work rooted at `root`.
    pub fn io_degree(&self, root: &Path) -> usize {
        self.effective(self.classifier.classify(root).io_degree())
    }

    /// Degree for the large-file bucket under `root`.
    pub fn large_file_degree(&self, root: &Path) -> usize {
        self.io_degree(root).min(LARGE_FILES_DEGREE).max(1)
    }

    /// Storage medium under `root` (exposed for progress/reporting).
    pub fn medium(&self, root: &Path) -> StorageMedium {
        self.classifier.classify(root)
    }

    /// Halve a nominal degree while the machine is under pressure.
    fn effective(&self, nominal: usize) -> usize {
        match &self.monitor {
            Some(monitor) if monitor.pressured() => (nominal / 2).max(1),
            _ => nominal,
        }
    }

    /// Per-item worker hook: brief sleep while the machine is pressured.
    /// No-op when throttling is disabled.
    pub fn throttle(&self) {
        if let Some(monitor) = &self.monitor {
            if monitor.pressured() {
                std::thread::sleep(THROTTLE_SLEEP);
            }
        }
    }

    /// Run a worker over every item with CPU-bound parallelism.
    pub fn for_each_cpu<T, F>(&self, items: &mut [T], controls: &ScanControls, worker: F)
    where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        self.run_pool(self.cpu_degree(), items, controls, worker);
    }

    /// Run a worker over every item with I/O-bound parallelism for `root`.
    pub fn for_each_io<T, F>(
        &self,
        root: &Path,
        items: &mut [T],
        controls: &ScanControls,
        worker: F,
    ) where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        self.run_pool(self.io_degree(root), items, controls, worker);
    }

    /// File-size-aware execution: small and medium buckets run at the I/O
    /// degree (small first), large files in their own narrower bucket.
    pub fn for_each_sized<T, F, S>(
        &self,
        root: &Path,
        items: &mut [T],
        size_of: S,
        controls: &ScanControls,
        worker: F,
    ) where
        T: Send,
        F: Fn(&mut T) + Sync,
        S: Fn(&T) -> u64,
    {
        let mut small: Vec<&mut T> = Vec::new();
        let mut medium: Vec<&mut T> = Vec::new();
        let mut large: Vec<&mut T> = Vec::new();
        for item in items.iter_mut() {
            let size = size_of(item);
            if size > LARGE_FILE_BYTES {
                large.push(item);
            } else if size >= SMALL_FILE_BYTES {
                medium.push(item);
            } else {
                small.push(item);
            }
        }

        let io_degree = self.io_degree(root);
        let large_degree = self.large_file_degree(root);

        self.run_pool_refs(io_degree, &mut small, controls, &worker);
        self.run_pool_refs(io_degree, &mut medium, controls, &worker);
        self.run_pool_refs(large_degree, &mut large, controls, &worker);
    }

    fn run_pool<T, F>(&self, degree: usize, items: &mut [T], controls: &ScanControls, worker: F)
    where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        let mut refs: Vec<&mut T> = items.iter_mut().collect();
        self.run_pool_refs(degree, &mut refs, controls, &worker);
    }

    fn run_pool_refs<T, F>(
        &self,
        degree: usize,
        items: &mut Vec<&mut T>,
        controls: &ScanControls,
        worker: &F,
    ) where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        if items.is_empty() {
            return;
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(degree.max(1))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!("thread pool build failed, running sequentially: {}", e);
                for item in items.iter_mut() {
                    if !controls.checkpoint() {
                        return;
                    }
                    self.throttle();
                    worker(&mut **item);
                }
                return;
            }
        };

        pool.install(|| {
            use rayon::prelude::*;
            items.par_iter_mut().for_each(|item| {
                if !controls.checkpoint() {
                    return;
                }
                self.throttle();
                worker(&mut **item);
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> ParallelExecutor {
        ParallelExecutor::new(&ScanConfig::default())
    }

    #[test]
    fn test_cpu_degree_respects_config_cap() {
        let capped = ParallelExecutor::new(&ScanConfig {
            parallel_threads: 1,
            ..Default::default()
        });
        assert_eq!(capped.cpu_degree(), 1);

        let auto = executor();
        assert!(auto.cpu_degree() >= 1);
        assert!(auto.cpu_degree() <= num_cpus::get());
    }

    #[test]
    fn test_for_each_cpu_visits_every_item() {
        let exec = executor();
        let controls = ScanControls::new();
        let mut items: Vec<u32> = (0..100).collect();

        exec.for_each_cpu(&mut items, &controls, |item| *item += 1);

        assert!(items.iter().enumerate().all(|(i, &v)| v == i as u32 + 1));
    }

    #[test]
    fn test_cancellation_skips_remaining_items() {
        let exec = executor();
        let controls = ScanControls::new();
        controls.cancel();

        let touched = AtomicUsize::new(0);
        let mut items: Vec<u32> = (0..50).collect();
        exec.for_each_cpu(&mut items, &controls, |_| {
            touched.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(touched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_size_aware_partitions_run_everything() {
        let exec = executor();
        let controls = ScanControls::new();
        let dir = tempfile::tempdir().unwrap();

        // (size, visited)
        let mut items: Vec<(u64, bool)> = vec![
            (1024, false),
            (50 * 1024 * 1024, false),
            (200 * 1024 * 1024, false),
            (500, false),
        ];

        exec.for_each_sized(
            dir.path(),
            &mut items,
            |item| item.0,
            &controls,
            |item| item.1 = true,
        );

        assert!(items.iter().all(|(_, visited)| *visited));
    }

    #[test]
    fn test_large_file_degree_is_narrow() {
        let exec = executor();
        let dir = tempfile::tempdir().unwrap();
        let degree = exec.large_file_degree(dir.path());
        assert!(degree >= 1);
        assert!(degree <= LARGE_FILES_DEGREE);
    }

    #[test]
    fn test_monitor_sampling_is_cheap_to_repeat() {
        let monitor = ResourceMonitor::new();
        // First call refreshes; the rest hit the 1s cache.
        let _ = monitor.pressured();
        let start = Instant::now();
        for _ in 0..1000 {
            let _ = monitor.pressured();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
