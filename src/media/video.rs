//! Video processing - keyframe fusion hash and mid-frame thumbnails
//!
//! Three stills at 25/50/75% of the duration each get the image structural
//! hash; the per-bit majority vote of those becomes the video-level hash.

use std::path::Path;

use anyhow::{Context, Result};

use super::image::{structural_dhash, thumbnail_bytes};
use super::tools::{self, ExternalTools};

/// Keyframe sample positions as fractions of the duration.
const KEYFRAME_POSITIONS: [f64; 3] = [0.25, 0.50, 0.75];

/// Fuse per-keyframe hashes: bit i is set iff more than half of the input
/// hashes have bit i set.
pub fn majority_fuse(hashes: &[u64]) -> u64 {
    let majority = hashes.len() / 2;
    let mut fused = 0u64;
    for bit in 0..64 {
        let votes = hashes.iter().filter(|h| (*h >> bit) & 1 == 1).count();
        if votes > majority {
            fused |= 1u64 << bit;
        }
    }
    fused
}

/// Compute the fused keyframe hash of a video.
///
/// Individual keyframe failures are tolerated; at least one extracted frame
/// is required for a hash.
pub fn video_hash(tools: &ExternalTools, input: &Path) -> Result<u64> {
    let prober = tools.prober()?;
    let transcoder = tools.transcoder()?;

    let duration = tools::probe_duration_secs(prober, input)
        .with_context(|| format!("Failed to probe duration: {}", input.display()))?;
    if duration <= 0.0 {
        anyhow::bail!("non-positive duration for {}", input.display());
    }

    // Unique working directory per invocation, removed on drop.
    let workdir = tempfile::tempdir().context("Failed to create keyframe workdir")?;

    let mut hashes = Vec::with_capacity(KEYFRAME_POSITIONS.len());
    for (i, fraction) in KEYFRAME_POSITIONS.iter().enumerate() {
        let out = workdir.path().join(format!("frame{}.jpg", i));
        match tools::extract_keyframe(transcoder, input, duration * fraction, &out) {
            Ok(()) => match image::open(&out) {
                Ok(frame) => hashes.push(structural_dhash(&frame)),
                Err(e) => {
                    tracing::warn!("undecodable keyframe {} of {}: {}", i, input.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("keyframe {} of {} failed: {}", i, input.display(), e);
            }
        }
    }

    if hashes.is_empty() {
        anyhow::bail!("no keyframes extracted from {}", input.display());
    }

    Ok(majority_fuse(&hashes))
}

/// Render a thumbnail from the mid-point frame, reusing the image pipeline.
pub fn video_thumbnail(tools: &ExternalTools, input: &Path, edge: u32) -> Result<Vec<u8>> {
    let prober = tools.prober()?;
    let transcoder = tools.transcoder()?;

    let duration = tools::probe_duration_secs(prober, input)
        .with_context(|| format!("Failed to probe duration: {}", input.display()))?;

    let workdir = tempfile::tempdir().context("Failed to create thumbnail workdir")?;
    let out = workdir.path().join("mid.jpg");
    tools::extract_keyframe(transcoder, input, (duration * 0.5).max(0.0), &out)
        .with_context(|| format!("Mid-frame extract failed: {}", input.display()))?;

    let frame =
        image::open(&out).with_context(|| format!("Undecodable mid-frame: {}", input.display()))?;
    thumbnail_bytes(&frame, edge)
}

/// Video stream resolution via the prober.
pub fn video_resolution(tools: &ExternalTools, input: &Path) -> Result<(u32, u32)> {
    let prober = tools.prober()?;
    tools::probe_dimensions(prober, input)
        .with_context(|| format!("Failed to probe dimensions: {}", input.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_fuse_two_of_three_wins() {
        let fused = majority_fuse(&[0b1011, 0b1001, 0b0001]);
        // bit0: 3 votes, bit1: 2 votes, bit3: 2 votes -> all set; bit2: 0.
        assert_eq!(fused, 0b1011);
    }

    #[test]
    fn test_majority_fuse_identical_inputs() {
        let h = 0xDEAD_BEEF_CAFE_F00Du64;
        assert_eq!(majority_fuse(&[h, h, h]), h);
    }

    #[test]
    fn test_majority_fuse_single_input_passes_through() {
        let h = 0x1234_5678u64;
        assert_eq!(majority_fuse(&[h]), h);
    }

    #[test]
    fn test_majority_fuse_requires_strict_majority() {
        // With two inputs a 1-1 split on a bit is not "more than half".
        let fused = majority_fuse(&[0b10, 0b01]);
        assert_eq!(fused, 0);
    }

    #[test]
    fn test_video_hash_without_tools_is_unavailable() {
        let tools = ExternalTools::default();
        assert!(video_hash(&tools, Path::new("/media/clip.mp4")).is_err());
        assert!(video_thumbnail(&tools, Path::new("/media/clip.mp4"), 64).is_err());
    }
}
