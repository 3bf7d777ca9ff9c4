//! FFmpeg process spawning for one segment.
//!
//! Spawns FFmpeg as a child process with progress on stdout (`-progress pipe:1`).
//! A background thread forwards stdout lines over a channel; the calling thread
//! relays them to the job and reports silence when nothing arrives within a poll
//! interval. Stderr is collected on its own thread for error reporting.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::discovery::ffmpeg_path;
use crate::error::SegmentFailure;
use crate::job::{CancelHandle, EngineSignal, TranscodeEngine};

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs segment invocations with a real FFmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    /// None resolves through discovery at run time.
    ffmpeg: Option<PathBuf>,
    poll_interval: Duration,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: Some(path.into()),
            ..Self::default()
        }
    }

    /// How long the engine waits for output before reporting `EngineSignal::Silent`.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn binary(&self) -> Result<PathBuf, SegmentFailure> {
        match &self.ffmpeg {
            Some(path) => Ok(path.clone()),
            None => ffmpeg_path().map(|p| p.to_path_buf()),
        }
    }
}

fn collect_stderr<R: Read + Send + 'static>(
    reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let mut guard = buffer.lock();
            guard.extend_from_slice(&line_buf);
            if guard.len() > MAX_STDERR_BYTES {
                let excess = guard.len() - MAX_STDERR_BYTES;
                guard.drain(..excess);
            }
            drop(guard);
            line_buf.clear();
        }
    })
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if tx.send(line).is_err() {
                break;
            }
            line_buf.clear();
        }
    })
}

impl TranscodeEngine for FfmpegEngine {
    fn run_segment(
        &self,
        args: &[String],
        cancel: &CancelHandle,
        on_signal: &mut dyn FnMut(EngineSignal<'_>),
    ) -> Result<(), SegmentFailure> {
        let ffmpeg = self.binary()?;
        log::debug!(
            target: "vid_slicer::ffmpeg::runner",
            "Spawning FFmpeg: path={}, output={:?}",
            ffmpeg.display(),
            args.last()
        );

        let mut cmd = Command::new(&ffmpeg);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SegmentFailure::EngineNotFound(format!(
                    "FFmpeg not found at {}",
                    ffmpeg.display()
                ))
            } else {
                SegmentFailure::non_zero_exit(-1, format!("Failed to spawn FFmpeg: {}", e))
            }
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SegmentFailure::non_zero_exit(
                -1,
                "Failed to capture FFmpeg output",
            ));
        };

        if let Err(mut child) = cancel.install(child) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SegmentFailure::non_zero_exit(255, "Aborted"));
        }

        let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
        let stderr_handle = collect_stderr(stderr, Arc::clone(&stderr_buffer));
        let (tx, rx) = mpsc::channel();
        let stdout_handle = forward_lines(stdout, tx);

        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(line) => on_signal(EngineSignal::Status(&line)),
                Err(RecvTimeoutError::Timeout) => on_signal(EngineSignal::Silent),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        let status = match cancel.take_active() {
            Some(mut child) => child
                .wait()
                .map_err(|e| SegmentFailure::non_zero_exit(-1, e.to_string()))?,
            None => {
                log::warn!(
                    target: "vid_slicer::ffmpeg::runner",
                    "FFmpeg process was aborted (terminated externally)"
                );
                return Err(SegmentFailure::non_zero_exit(255, "Aborted"));
            }
        };

        let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

        if status.success() {
            log::info!(
                target: "vid_slicer::ffmpeg::runner",
                "FFmpeg completed: {:?}",
                args.last()
            );
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            let err_preview = stderr_str
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .join("; ");
            log::error!(
                target: "vid_slicer::ffmpeg::runner",
                "FFmpeg failed (code={}): {}",
                code,
                err_preview
            );
            Err(SegmentFailure::non_zero_exit(code, stderr_str))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Shell script standing in for ffmpeg.
    fn fake_ffmpeg(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn run(engine: &FfmpegEngine) -> (Result<(), SegmentFailure>, Vec<String>, usize) {
        let mut lines = Vec::new();
        let mut silent = 0;
        let result = engine.run_segment(&[], &CancelHandle::default(), &mut |signal| match signal {
            EngineSignal::Status(line) => lines.push(line.to_string()),
            EngineSignal::Silent => silent += 1,
        });
        (result, lines, silent)
    }

    #[test]
    fn relays_stdout_lines() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FfmpegEngine::with_binary(fake_ffmpeg(
            dir.path(),
            "echo out_time_us=1000000\necho progress=end",
        ));
        let (result, lines, _) = run(&engine);
        assert!(result.is_ok());
        assert_eq!(lines, vec!["out_time_us=1000000", "progress=end"]);
    }

    #[test]
    fn non_zero_exit_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FfmpegEngine::with_binary(fake_ffmpeg(
            dir.path(),
            "echo 'Invalid data found when processing input' >&2\nexit 1",
        ));
        let (result, _, _) = run(&engine);
        match result {
            Err(SegmentFailure::EngineNonZeroExit { code, stderr }) => {
                assert_eq!(code, 1);
                assert!(stderr.contains("Invalid data found"));
            }
            other => panic!("expected non-zero exit, got {:?}", other),
        }
    }

    #[test]
    fn missing_binary_is_engine_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FfmpegEngine::with_binary(dir.path().join("nope"));
        let (result, _, _) = run(&engine);
        assert!(matches!(result, Err(SegmentFailure::EngineNotFound(_))));
    }

    #[test]
    fn silence_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FfmpegEngine::with_binary(fake_ffmpeg(dir.path(), "sleep 1"))
            .poll_interval(Duration::from_millis(50));
        let (result, _, silent) = run(&engine);
        assert!(result.is_ok());
        assert!(silent >= 2, "silent={silent}");
    }

    #[test]
    fn cancel_kills_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FfmpegEngine::with_binary(fake_ffmpeg(dir.path(), "exec sleep 30"))
            .poll_interval(Duration::from_millis(20));
        let cancel = CancelHandle::default();
        let started = std::time::Instant::now();
        let result = engine.run_segment(&[], &cancel, &mut |signal| {
            if let EngineSignal::Silent = signal {
                cancel.cancel();
            }
        });
        assert!(result.is_err());
        assert!(cancel.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
