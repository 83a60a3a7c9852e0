//! Media module - perceptual descriptors, thumbnails, resolution
//!
//! One processor per media kind behind a single facade. Every operation may
//! come back empty ("no descriptor available"); the orchestrator treats that
//! as exclusion from later phases, never as a scan failure.

pub mod audio;
pub mod image;
pub mod tools;
pub mod video;

use std::path::Path;
use std::sync::Arc;

pub use image::ImageDescriptors;
pub use tools::{ExternalTools, ToolError};

use crate::cache::ThumbnailCache;
use crate::config::ScanConfig;
use crate::core::{FileEntry, MediaKind};

/// Facade dispatching descriptor work by media kind, with thumbnail
/// memoization through the durable cache.
pub struct MediaProcessor {
    tools: ExternalTools,
    thumbnails: Arc<ThumbnailCache>,
    thumbnail_edge: u32,
}

impl MediaProcessor {
    pub fn new(config: &ScanConfig, thumbnails: Arc<ThumbnailCache>) -> Self {
        Self {
            tools: ExternalTools::resolve(config),
            thumbnails,
            thumbnail_edge: config.thumbnail_edge_px,
        }
    }

    pub fn tools(&self) -> &ExternalTools {
        &self.tools
    }

    /// Structural + chrominance hashes for an image entry.
    pub fn image_descriptors(&self, entry: &FileEntry) -> Option<ImageDescriptors> {
        match image::hash_image(&entry.path) {
            Ok(desc) => Some(desc),
            Err(e) => {
                tracing::warn!("no image descriptors for {}: {}", entry.path.display(), e);
                None
            }
        }
    }

    /// Fused keyframe hash for a video entry.
    pub fn video_hash(&self, entry: &FileEntry) -> Option<u64> {
        match video::video_hash(&self.tools, &entry.path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!("no video hash for {}: {}", entry.path.display(), e);
                None
            }
        }
    }

    /// PCM fingerprint for an audio entry.
    pub fn audio_fingerprint(&self, entry: &FileEntry) -> Option<u64> {
        match audio::audio_fingerprint(&self.tools, &entry.path) {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::warn!("no audio fingerprint for {}: {}", entry.path.display(), e);
                None
            }
        }
    }

    /// Resolution for image and video entries.
    pub fn resolution(&self, entry: &FileEntry) -> Option<(u32, u32)> {
        let result = match entry.kind {
            MediaKind::Image => image::image_resolution(&entry.path),
            MediaKind::Video => video::video_resolution(&self.tools, &entry.path),
            _ => return None,
        };

        match result {
            Ok(dims) => Some(dims),
            Err(e) => {
                tracing::debug!("no resolution for {}: {}", entry.path.display(), e);
                None
            }
        }
    }

    /// Thumbnail bytes for an entry, cache-first. A freshly rendered
    /// thumbnail is stored through the cache before being returned.
    pub fn thumbnail(&self, entry: &FileEntry) -> Option<Vec<u8>> {
        let ticks = entry.mtime_ticks();
        if let Some(cached) = self.thumbnails.try_get(&entry.path, entry.size, ticks) {
            return Some(cached);
        }

        let rendered = match entry.kind {
            MediaKind::Image => image::render_thumbnail(&entry.path, self.thumbnail_edge),
            MediaKind::Video => {
                video::video_thumbnail(&self.tools, &entry.path, self.thumbnail_edge)
            }
            _ => return None,
        };

        match rendered {
            Ok(bytes) => {
                self.thumbnails.save(&entry.path, entry.size, ticks, &bytes);
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!("no thumbnail for {}: {}", entry.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{DynamicImage, Rgb, RgbImage};
    use tempfile::tempdir;

    fn processor() -> MediaProcessor {
        MediaProcessor::new(
            &ScanConfig::default(),
            Arc::new(ThumbnailCache::in_memory().unwrap()),
        )
    }

    fn entry_for(path: &Path) -> FileEntry {
        let metadata = std::fs::metadata(path).unwrap();
        FileEntry::from_metadata(path.to_path_buf(), &metadata)
    }

    #[test]
    fn test_image_descriptors_for_real_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([200, 10, 10])))
            .save(&path)
            .unwrap();

        let desc = processor().image_descriptors(&entry_for(&path));
        assert!(desc.is_some());
    }

    #[test]
    fn test_broken_image_yields_no_descriptors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"garbage").unwrap();

        assert!(processor().image_descriptors(&entry_for(&path)).is_none());
    }

    #[test]
    fn test_thumbnail_round_trips_through_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.png");
        DynamicImage::ImageRgb8(RgbImage::new(100, 50))
            .save(&path)
            .unwrap();

        let cache = Arc::new(ThumbnailCache::in_memory().unwrap());
        let proc = MediaProcessor::new(&ScanConfig::default(), Arc::clone(&cache));
        let entry = entry_for(&path);

        let bytes = proc.thumbnail(&entry).unwrap();
        assert!(!bytes.is_empty());

        // Second call must be served from the cache record.
        let cached = cache
            .try_get(&path, entry.size, entry.mtime_ticks())
            .unwrap();
        assert_eq!(cached, bytes);
        assert_eq!(proc.thumbnail(&entry).unwrap(), bytes);
    }

    #[test]
    fn test_other_kind_has_no_thumbnail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, b"text").unwrap();

        assert!(processor().thumbnail(&entry_for(&path)).is_none());
    }

    #[test]
    fn test_resolution_for_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.png");
        DynamicImage::ImageRgb8(RgbImage::new(77, 33))
            .save(&path)
            .unwrap();

        assert_eq!(processor().resolution(&entry_for(&path)), Some((77, 33)));
    }
}
