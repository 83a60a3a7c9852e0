//! Cache module - durable hash and thumbnail memoization
//!
//! Two SQLite database files under the per-user cache directory:
//! `hashes.db` (tables `quickhashes`, `fullhashes`) and `thumbnails.db`
//! (table `thumbnails`). Records are keyed by absolute path and validated
//! against the file's current (size, mtime_ticks); a mismatch deletes the
//! stale record on read. Every cache failure is non-fatal and degrades to
//! "not cached".

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Per-user cache directory (platform-native local app data).
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "tunclon", "dupsweep")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".dupsweep-cache"))
}

/// Cache key for a path. Case-folded on Windows, where the filesystem is
/// case-insensitive.
fn cache_key(path: &Path) -> String {
    let key = path.to_string_lossy().to_string();
    if cfg!(windows) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Record counts for display.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub quick_records: usize,
    pub full_records: usize,
    pub thumbnail_records: usize,
}

// ---------------------------------------------------------------------------
// Hash cache
// ---------------------------------------------------------------------------

/// Durable quick/full hash store keyed by (path, size, mtime_ticks).
pub struct HashCache {
    conn: Mutex<Connection>,
}

impl HashCache {
    /// Open (creating if needed) `hashes.db` in the given directory.
    pub fn open_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        Self::open_file(&dir.join("hashes.db"))
    }

    /// Open the cache under the default per-user cache directory.
    pub fn open_default() -> Result<Self> {
        Self::open_in(&default_cache_dir())
    }

    /// In-memory cache, used by tests and as the fallback when the on-disk
    /// database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory cache")?;
        Self::init(conn)
    }

    fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open hash cache: {}", path.display()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quickhashes (
                path        TEXT PRIMARY KEY,
                size        INTEGER NOT NULL,
                mtime_ticks INTEGER NOT NULL,
                hash        TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fullhashes (
                path        TEXT PRIMARY KEY,
                size        INTEGER NOT NULL,
                mtime_ticks INTEGER NOT NULL,
                hash        TEXT NOT NULL
            );",
        )
        .context("Failed to initialize hash cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a quick hash; stale records are deleted and miss.
    pub fn try_get_quick(&self, path: &Path, size: u64, mtime_ticks: i64) -> Option<String> {
        self.try_get("quickhashes", path, size, mtime_ticks)
    }

    /// Look up a full hash; stale records are deleted and miss.
    pub fn try_get_full(&self, path: &Path, size: u64, mtime_ticks: i64) -> Option<String> {
        self.try_get("fullhashes", path, size, mtime_ticks)
    }

    /// Upsert a quick hash record.
    pub fn save_quick(&self, path: &Path, size: u64, mtime_ticks: i64, digest: &str) {
        self.save("quickhashes", path, size, mtime_ticks, digest);
    }

    /// Upsert a full hash record.
    pub fn save_full(&self, path: &Path, size: u64, mtime_ticks: i64, digest: &str) {
        self.save("fullhashes", path, size, mtime_ticks, digest);
    }

    fn try_get(&self, table: &str, path: &Path, size: u64, mtime_ticks: i64) -> Option<String> {
        let key = cache_key(path);
        let conn = self.conn.lock();

        let row: Option<(i64, i64, String)> = conn
            .query_row(
                &format!("SELECT size, mtime_ticks, hash FROM {} WHERE path = ?1", table),
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::warn!("Hash cache read failed for {}: {}", path.display(), e);
                None
            });
        let row = row?;

        let (stored_size, stored_ticks, hash) = row;
        if stored_size != size as i64 || stored_ticks != mtime_ticks {
            // Stale record: the file changed since it was cached.
            if let Err(e) = conn.execute(
                &format!("DELETE FROM {} WHERE path = ?1", table),
                params![key],
            ) {
                tracing::warn!("Failed to drop stale record for {}: {}", path.display(), e);
            }
            return None;
        }

        Some(hash)
    }

    fn save(&self, table: &str, path: &Path, size: u64, mtime_ticks: i64, digest: &str) {
        let key = cache_key(path);
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            &format!(
                "INSERT INTO {} (path, size, mtime_ticks, hash) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                     size = excluded.size,
                     mtime_ticks = excluded.mtime_ticks,
                     hash = excluded.hash",
                table
            ),
            params![key, size as i64, mtime_ticks, digest],
        ) {
            tracing::warn!("Hash cache write failed for {}: {}", path.display(), e);
        }
    }

    /// Drop both hash collections.
    pub fn clear(&self) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute_batch("DELETE FROM quickhashes; DELETE FROM fullhashes;") {
            tracing::warn!("Failed to clear hash cache: {}", e);
        }
    }

    /// Record counts for both collections.
    pub fn stats(&self) -> CacheStats {
        let conn = self.conn.lock();
        let count = |table: &str| -> usize {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as usize
        };

        CacheStats {
            quick_records: count("quickhashes"),
            full_records: count("fullhashes"),
            thumbnail_records: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Thumbnail cache
// ---------------------------------------------------------------------------

/// Durable thumbnail store, same invalidation key as the hash cache.
pub struct ThumbnailCache {
    conn: Mutex<Connection>,
}

impl ThumbnailCache {
    /// Open (creating if needed) `thumbnails.db` in the given directory.
    pub fn open_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        let path = dir.join("thumbnails.db");
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open thumbnail cache: {}", path.display()))?;
        Self::init(conn)
    }

    /// Open the cache under the default per-user cache directory.
    pub fn open_default() -> Result<Self> {
        Self::open_in(&default_cache_dir())
    }

    /// In-memory cache for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory cache")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS thumbnails (
                path        TEXT PRIMARY KEY,
                size        INTEGER NOT NULL,
                mtime_ticks INTEGER NOT NULL,
                data        BLOB NOT NULL
            );",
        )
        .context("Failed to initialize thumbnail cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up thumbnail bytes; stale records are deleted and miss.
    pub fn try_get(&self, path: &Path, size: u64, mtime_ticks: i64) -> Option<Vec<u8>> {
        let key = cache_key(path);
        let conn = self.conn.lock();

        let row: Option<(i64, i64, Vec<u8>)> = conn
            .query_row(
                "SELECT size, mtime_ticks, data FROM thumbnails WHERE path = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::warn!("Thumbnail cache read failed for {}: {}", path.display(), e);
                None
            });
        let row = row?;

        let (stored_size, stored_ticks, data) = row;
        if stored_size != size as i64 || stored_ticks != mtime_ticks {
            if let Err(e) = conn.execute("DELETE FROM thumbnails WHERE path = ?1", params![key]) {
                tracing::warn!(
                    "Failed to drop stale thumbnail for {}: {}",
                    path.display(),
                    e
                );
            }
            return None;
        }

        Some(data)
    }

    /// Upsert a thumbnail record.
    pub fn save(&self, path: &Path, size: u64, mtime_ticks: i64, data: &[u8]) {
        let key = cache_key(path);
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT INTO thumbnails (path, size, mtime_ticks, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 size = excluded.size,
                 mtime_ticks = excluded.mtime_ticks,
                 data = excluded.data",
            params![key, size as i64, mtime_ticks, data],
        ) {
            tracing::warn!("Thumbnail cache write failed for {}: {}", path.display(), e);
        }
    }

    /// Drop the thumbnail collection.
    pub fn clear(&self) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute("DELETE FROM thumbnails", []) {
            tracing::warn!("Failed to clear thumbnail cache: {}", e);
        }
    }

    /// Number of cached thumbnails.
    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM thumbnails", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_cache_miss_then_hit() {
        let cache = HashCache::in_memory().unwrap();
        let path = Path::new("/photos/a.jpg");

        assert!(cache.try_get_quick(path, 100, 42).is_none());

        cache.save_quick(path, 100, 42, "abcd1234");
        assert_eq!(cache.try_get_quick(path, 100, 42).unwrap(), "abcd1234");
    }

    #[test]
    fn test_stale_record_is_dropped_on_read() {
        let cache = HashCache::in_memory().unwrap();
        let path = Path::new("/photos/a.jpg");

        cache.save_full(path, 100, 42, "deadbeef");

        // Same size, different mtime: the record must be invalidated.
        assert!(cache.try_get_full(path, 100, 43).is_none());
        // And it is gone, not just hidden.
        assert!(cache.try_get_full(path, 100, 42).is_none());
    }

    #[test]
    fn test_upsert_replaces_record() {
        let cache = HashCache::in_memory().unwrap();
        let path = Path::new("/photos/a.jpg");

        cache.save_quick(path, 100, 42, "old");
        cache.save_quick(path, 100, 43, "new");

        assert_eq!(cache.try_get_quick(path, 100, 43).unwrap(), "new");
    }

    #[test]
    fn test_quick_and_full_are_separate_collections() {
        let cache = HashCache::in_memory().unwrap();
        let path = Path::new("/photos/a.jpg");

        cache.save_quick(path, 100, 42, "quick");
        assert!(cache.try_get_full(path, 100, 42).is_none());

        cache.save_full(path, 100, 42, "full");
        let stats = cache.stats();
        assert_eq!(stats.quick_records, 1);
        assert_eq!(stats.full_records, 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = HashCache::in_memory().unwrap();
        cache.save_quick(Path::new("/a"), 1, 1, "x");
        cache.save_full(Path::new("/a"), 1, 1, "y");

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.quick_records, 0);
        assert_eq!(stats.full_records, 0);
    }

    #[test]
    fn test_thumbnail_round_trip_and_invalidation() {
        let cache = ThumbnailCache::in_memory().unwrap();
        let path = Path::new("/photos/b.png");
        let bytes = vec![0xFFu8, 0xD8, 0xFF, 0xE0];

        cache.save(path, 2048, 7, &bytes);
        assert_eq!(cache.try_get(path, 2048, 7).unwrap(), bytes);

        // Changed size invalidates.
        assert!(cache.try_get(path, 2049, 7).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_on_disk_caches_use_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let hashes = HashCache::open_in(dir.path()).unwrap();
        let thumbs = ThumbnailCache::open_in(dir.path()).unwrap();

        hashes.save_quick(Path::new("/a"), 1, 1, "q");
        thumbs.save(Path::new("/a"), 1, 1, b"t");

        assert!(dir.path().join("hashes.db").exists());
        assert!(dir.path().join("thumbnails.db").exists());
    }
}
