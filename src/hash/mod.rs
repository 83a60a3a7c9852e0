//! Hash module - streaming content digests with cache memoization
//!
//! Two entry points: a quick prefix digest (XXH3-128 over the first 64 KiB)
//! that weeds out non-duplicates cheaply, and a full-file BLAKE3 digest
//! strong enough that no byte-by-byte second pass is needed. Both consult
//! the hash cache keyed by (path, size, mtime_ticks) before touching the
//! file.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use xxhash_rust::xxh3::xxh3_128;

use crate::cache::HashCache;
use crate::core::FileEntry;
use crate::orchestrator::ScanControls;

/// Bytes of file prefix fed to the quick hash. Combined with the
/// size-equality prefilter this is enough to separate non-duplicates.
pub const QUICK_HASH_PREFIX_BYTES: usize = 64 * 1024;

/// Cancellation check period while streaming the full hash.
const CANCEL_CHECK_BYTES: usize = 1024 * 1024;

/// Compute the quick prefix digest of a file (lowercase hex).
pub fn quick_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open for quick hash: {}", path.display()))?;

    let mut buf = vec![0u8; QUICK_HASH_PREFIX_BYTES];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .with_context(|| format!("Read failed during quick hash: {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(hex::encode(xxh3_128(&buf[..filled]).to_be_bytes()))
}

/// Compute the full BLAKE3 digest of a file (lowercase hex), observing
/// cancellation every 1 MiB. Returns Ok(None) when cancelled mid-stream.
pub fn full_digest(path: &Path, controls: &ScanControls) -> Result<Option<String>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open for full hash: {}", path.display()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut since_check = 0usize;

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Read failed during full hash: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);

        since_check += n;
        if since_check >= CANCEL_CHECK_BYTES {
            since_check = 0;
            if controls.is_cancelled() {
                return Ok(None);
            }
        }
    }

    Ok(Some(hasher.finalize().to_hex().to_string()))
}

/// Hash service wiring digests through the durable cache.
pub struct HashService {
    cache: Arc<HashCache>,
}

impl HashService {
    pub fn new(cache: Arc<HashCache>) -> Self {
        Self { cache }
    }

    /// Quick hash for an entry, cached by file identity.
    pub fn quick_hash(&self, entry: &FileEntry) -> Result<String> {
        let ticks = entry.mtime_ticks();
        if let Some(hash) = self.cache.try_get_quick(&entry.path, entry.size, ticks) {
            tracing::debug!("quick hash cache hit: {}", entry.path.display());
            return Ok(hash);
        }

        let hash = quick_digest(&entry.path)?;
        self.cache.save_quick(&entry.path, entry.size, ticks, &hash);
        Ok(hash)
    }

    /// Full hash for an entry, cached by file identity. Zero-size files are
    /// never full-hashed. Returns Ok(None) when cancelled mid-stream.
    pub fn full_hash(&self, entry: &FileEntry, controls: &ScanControls) -> Result<Option<String>> {
        debug_assert!(entry.size > 0, "zero-size files are not full-hashed");

        let ticks = entry.mtime_ticks();
        if let Some(hash) = self.cache.try_get_full(&entry.path, entry.size, ticks) {
            tracing::debug!("full hash cache hit: {}", entry.path.display());
            return Ok(Some(hash));
        }

        match full_digest(&entry.path, controls)? {
            Some(hash) => {
                self.cache.save_full(&entry.path, entry.size, ticks, &hash);
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry_for(path: &Path) -> FileEntry {
        let metadata = std::fs::metadata(path).unwrap();
        FileEntry::from_metadata(path.to_path_buf(), &metadata)
    }

    #[test]
    fn test_quick_digest_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello dupsweep").unwrap();

        let h1 = quick_digest(&path).unwrap();
        let h2 = quick_digest(&path).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32); // 128-bit hex
        assert_eq!(h1, h1.to_lowercase());
    }

    #[test]
    fn test_quick_digest_only_reads_prefix() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");

        // Identical 64 KiB prefix, different tails.
        let mut data_a = vec![0xABu8; QUICK_HASH_PREFIX_BYTES];
        let mut data_b = data_a.clone();
        data_a.extend_from_slice(b"tail-one");
        data_b.extend_from_slice(b"tail-two");
        std::fs::write(&a, &data_a).unwrap();
        std::fs::write(&b, &data_b).unwrap();

        assert_eq!(quick_digest(&a).unwrap(), quick_digest(&b).unwrap());
    }

    #[test]
    fn test_full_digest_differs_on_tail() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");

        let mut data_a = vec![0xABu8; QUICK_HASH_PREFIX_BYTES];
        let mut data_b = data_a.clone();
        data_a.extend_from_slice(b"tail-one");
        data_b.extend_from_slice(b"tail-two");
        std::fs::write(&a, &data_a).unwrap();
        std::fs::write(&b, &data_b).unwrap();

        let controls = ScanControls::new();
        let ha = full_digest(&a, &controls).unwrap().unwrap();
        let hb = full_digest(&b, &controls).unwrap().unwrap();

        assert_ne!(ha, hb);
        assert_eq!(ha.len(), 64); // BLAKE3 = 32 bytes = 64 hex chars
    }

    #[test]
    fn test_missing_file_is_an_explicit_failure() {
        let controls = ScanControls::new();
        assert!(quick_digest(Path::new("/nonexistent/x.bin")).is_err());
        assert!(full_digest(Path::new("/nonexistent/x.bin"), &controls).is_err());
    }

    #[test]
    fn test_service_uses_cache_across_calls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.bin");
        std::fs::write(&path, b"cache me").unwrap();

        let cache = Arc::new(HashCache::in_memory().unwrap());
        let service = HashService::new(Arc::clone(&cache));
        let entry = entry_for(&path);

        let first = service.quick_hash(&entry).unwrap();

        // The cached value is returned even if the bytes change behind our
        // back, because (size, mtime) still match the record.
        assert_eq!(
            cache
                .try_get_quick(&path, entry.size, entry.mtime_ticks())
                .unwrap(),
            first
        );
        assert_eq!(service.quick_hash(&entry).unwrap(), first);
    }

    #[test]
    fn test_stale_cache_recomputes_full_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.bin");
        std::fs::write(&path, b"version-one").unwrap();

        let cache = Arc::new(HashCache::in_memory().unwrap());
        let service = HashService::new(Arc::clone(&cache));
        let controls = ScanControls::new();

        let entry = entry_for(&path);
        let first = service.full_hash(&entry, &controls).unwrap().unwrap();

        // Same size, new content and mtime: recompute, replace record.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, b"version-two").unwrap();
        let entry = entry_for(&path);
        let second = service.full_hash(&entry, &controls).unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(
            cache
                .try_get_full(&path, entry.size, entry.mtime_ticks())
                .unwrap(),
            second
        );
    }

    #[test]
    fn test_cancelled_full_hash_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        // Big enough to cross at least one cancellation check.
        std::fs::write(&path, vec![0u8; 3 * 1024 * 1024]).unwrap();

        let controls = ScanControls::new();
        controls.cancel();

        assert!(full_digest(&path, &controls).unwrap().is_none());
    }
}
