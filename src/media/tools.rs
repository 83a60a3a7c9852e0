//! External tool invocation - transcoder (ffmpeg) and prober (ffprobe)
//!
//! Resolution order: explicit config path, bundled next to the executable,
//! bundled in the working directory, then PATH. Every invocation runs under
//! a bounded timeout and non-zero exit or timeout means the descriptor is
//! simply unavailable for that file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ScanConfig;

/// Probe calls answer quickly or not at all.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Transcodes (keyframe extract, PCM decode) get a minute.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Why an external tool invocation produced no output.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("external tool not available")]
    NotFound,
    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: i32,
        stderr: String,
    },
    #[error("unparseable tool output: {0}")]
    BadOutput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolved paths to the external media tools.
#[derive(Debug, Clone, Default)]
pub struct ExternalTools {
    transcoder: Option<PathBuf>,
    prober: Option<PathBuf>,
}

impl ExternalTools {
    /// Resolve both tools for a scan configuration.
    pub fn resolve(config: &ScanConfig) -> Self {
        let transcoder = find_tool("ffmpeg", config.transcoder_path.as_deref());
        let prober = find_tool("ffprobe", config.prober_path.as_deref());

        if transcoder.is_none() {
            tracing::warn!("transcoder not found; video/audio perceptual phases will be skipped");
        }
        if prober.is_none() {
            tracing::warn!("prober not found; video duration queries unavailable");
        }

        Self { transcoder, prober }
    }

    pub fn transcoder(&self) -> Result<&Path, ToolError> {
        self.transcoder.as_deref().ok_or(ToolError::NotFound)
    }

    pub fn prober(&self) -> Result<&Path, ToolError> {
        self.prober.as_deref().ok_or(ToolError::NotFound)
    }

    /// Both tools resolved; required for the video perceptual phase.
    pub fn video_capable(&self) -> bool {
        self.transcoder.is_some() && self.prober.is_some()
    }

    /// Transcoder resolved; required for the audio perceptual phase.
    pub fn audio_capable(&self) -> bool {
        self.transcoder.is_some()
    }
}

/// Locate a tool: override path, install dir, working dir, then PATH.
fn find_tool(name: &str, override_path: Option<&Path>) -> Option<PathBuf> {
    let binary = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    if let Some(path) = override_path {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(
            "configured {} override does not exist: {}",
            name,
            path.display()
        );
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join(&binary);
            if bundled.is_file() {
                return Some(bundled);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let local = cwd.join(&binary);
        if local.is_file() {
            return Some(local);
        }
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(&binary))
        .find(|candidate| candidate.is_file())
}

/// Captured output from a bounded tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a command, killing it once the timeout elapses.
///
/// Stdout/stderr are drained on separate threads so a chatty tool can never
/// deadlock against a full pipe.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ToolOutput, ToolError> {
    let tool = Path::new(cmd.get_program())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tool".to_string());

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(ToolError::Timeout { tool, timeout });
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(ToolError::Failed {
            tool,
            status: status.code().unwrap_or(-1),
            stderr: stderr.lines().last().unwrap_or_default().to_string(),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Query media duration in seconds via the prober.
pub fn probe_duration_secs(prober: &Path, input: &Path) -> Result<f64, ToolError> {
    let mut cmd = Command::new(prober);
    cmd.arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=nokey=1:noprint_wrappers=1")
        .arg(input);

    let output = run_with_timeout(cmd, PROBE_TIMEOUT)?;
    let text = output.stdout.trim();
    text.parse::<f64>()
        .map_err(|_| ToolError::BadOutput(text.to_string()))
}

/// Query video stream dimensions via the prober.
pub fn probe_dimensions(prober: &Path, input: &Path) -> Result<(u32, u32), ToolError> {
    let mut cmd = Command::new(prober);
    cmd.arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=s=x:p=0")
        .arg(input);

    let output = run_with_timeout(cmd, PROBE_TIMEOUT)?;
    let text = output.stdout.trim();
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| ToolError::BadOutput(text.to_string()))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| ToolError::BadOutput(text.to_string()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| ToolError::BadOutput(text.to_string()))?;
    Ok((width, height))
}

/// Extract a single still frame at the given position.
pub fn extract_keyframe(
    transcoder: &Path,
    input: &Path,
    position_secs: f64,
    out_jpg: &Path,
) -> Result<(), ToolError> {
    let mut cmd = Command::new(transcoder);
    cmd.arg("-y")
        .arg("-ss")
        .arg(format!("{:.3}", position_secs))
        .arg("-i")
        .arg(input)
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg("2")
        .arg(out_jpg);

    run_with_timeout(cmd, TRANSCODE_TIMEOUT)?;
    if !out_jpg.is_file() {
        return Err(ToolError::BadOutput("no frame produced".to_string()));
    }
    Ok(())
}

/// Decode up to 60 seconds of audio to mono signed-16-bit PCM at 8 kHz.
pub fn transcode_pcm(transcoder: &Path, input: &Path, out_pcm: &Path) -> Result<(), ToolError> {
    let mut cmd = Command::new(transcoder);
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg("8000")
        .arg("-t")
        .arg("60")
        .arg("-f")
        .arg("s16le")
        .arg(out_pcm);

    run_with_timeout(cmd, TRANSCODE_TIMEOUT)?;
    if !out_pcm.is_file() {
        return Err(ToolError::BadOutput("no PCM produced".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tool_prefers_existing_override() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();

        let found = find_tool("ffmpeg", Some(&fake));
        assert_eq!(found, Some(fake));
    }

    #[test]
    fn test_find_tool_ignores_missing_override() {
        // A bogus override falls through to the search chain rather than
        // being returned verbatim.
        let missing = Path::new("/definitely/not/here/ffmpeg");
        let found = find_tool("ffmpeg", Some(missing));
        assert_ne!(found.as_deref(), Some(missing));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 42.5");

        let output = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(output.stdout.trim(), "42.5");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_kills_hung_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let started = Instant::now();
        let err = run_with_timeout(cmd, Duration::from_millis(200)).unwrap_err();

        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops >&2; exit 3");

        let err = run_with_timeout(cmd, Duration::from_secs(5)).unwrap_err();
        match err {
            ToolError::Failed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
