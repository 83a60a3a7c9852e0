//! Audio fingerprinting - XXH3 over decoded PCM
//!
//! The transcoder emits mono signed-16-bit PCM at 8 kHz (up to 60 s);
//! one-second segments are streamed through a 64-bit XXH3 hasher and the
//! final digest is the fingerprint.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use xxhash_rust::xxh3::Xxh3;

use super::tools::{self, ExternalTools};

/// One second of mono s16le at 8 kHz.
const SEGMENT_BYTES: usize = 8000 * 2;

/// Fingerprint a PCM stream segment by segment.
pub fn fingerprint_pcm<R: Read>(mut reader: R) -> Result<u64> {
    let mut hasher = Xxh3::new();
    let mut segment = vec![0u8; SEGMENT_BYTES];
    let mut total = 0usize;

    loop {
        let mut filled = 0usize;
        while filled < segment.len() {
            let n = reader
                .read(&mut segment[filled..])
                .context("Read failed during PCM fingerprint")?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        hasher.update(&segment[..filled]);
        total += filled;
        if filled < segment.len() {
            break;
        }
    }

    if total == 0 {
        anyhow::bail!("empty PCM stream");
    }

    Ok(hasher.digest())
}

/// Compute the audio fingerprint of a media file via the transcoder.
pub fn audio_fingerprint(tools: &ExternalTools, input: &Path) -> Result<u64> {
    let transcoder = tools.transcoder()?;

    let workdir = tempfile::tempdir().context("Failed to create PCM workdir")?;
    let pcm_path = workdir.path().join("out.pcm");

    tools::transcode_pcm(transcoder, input, &pcm_path)
        .with_context(|| format!("PCM decode failed: {}", input.display()))?;

    let file = std::fs::File::open(&pcm_path)
        .with_context(|| format!("Failed to open PCM output for {}", input.display()))?;
    fingerprint_pcm(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fingerprint_is_stable() {
        let pcm: Vec<u8> = (0..SEGMENT_BYTES * 3).map(|i| (i % 251) as u8).collect();

        let a = fingerprint_pcm(Cursor::new(pcm.clone())).unwrap();
        let b = fingerprint_pcm(Cursor::new(pcm)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        let a: Vec<u8> = vec![1u8; SEGMENT_BYTES];
        let mut b = a.clone();
        b[100] = 2;

        assert_ne!(
            fingerprint_pcm(Cursor::new(a)).unwrap(),
            fingerprint_pcm(Cursor::new(b)).unwrap()
        );
    }

    #[test]
    fn test_partial_trailing_segment_counts() {
        let full: Vec<u8> = vec![7u8; SEGMENT_BYTES];
        let longer: Vec<u8> = vec![7u8; SEGMENT_BYTES + 123];

        assert_ne!(
            fingerprint_pcm(Cursor::new(full)).unwrap(),
            fingerprint_pcm(Cursor::new(longer)).unwrap()
        );
    }

    #[test]
    fn test_empty_stream_is_an_error() {
        assert!(fingerprint_pcm(Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn test_fingerprint_without_transcoder_is_unavailable() {
        let tools = ExternalTools::default();
        assert!(audio_fingerprint(&tools, Path::new("/media/song.mp3")).is_err());
    }
}
