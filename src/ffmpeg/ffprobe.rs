//! FFprobe-based media inspection: duration, audio tracks and key-frame timestamps.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use serde::Deserialize;

use super::discovery::ffprobe_path;
use super::path_to_string;
use crate::error::{AppError, ProbeError};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FfprobePacket {
    pts_time: Option<String>,
    flags: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobePackets {
    #[serde(default)]
    packets: Vec<FfprobePacket>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Stream index within the container.
    pub stream_index: u32,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub channels: Option<u32>,
    pub label: String,
}

/// A probed source file. Re-probe instead of mutating.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMedia {
    pub path: PathBuf,
    pub total_duration_seconds: f64,
    /// Ascending. Empty when not requested or not reported.
    pub key_frame_timestamps: Vec<f64>,
    /// Ordered as ffmpeg's `0:a:<position>` mapping.
    pub audio_tracks: Vec<AudioTrack>,
}

impl SourceMedia {
    pub fn new(path: impl Into<PathBuf>, total_duration_seconds: f64) -> Self {
        Self {
            path: path.into(),
            total_duration_seconds,
            key_frame_timestamps: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    pub fn with_key_frames(mut self, mut timestamps: Vec<f64>) -> Self {
        normalize_timestamps(&mut timestamps);
        self.key_frame_timestamps = timestamps;
        self
    }
}

fn normalize_timestamps(timestamps: &mut Vec<f64>) {
    timestamps.retain(|t| t.is_finite());
    timestamps.sort_by(f64::total_cmp);
    timestamps.dedup();
}

fn non_empty_tag(tags: Option<&HashMap<String, String>>, key: &str) -> Option<String> {
    tags?
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Title, else language, else `Stream #<index>`; codec and channel count in parentheses.
fn audio_label(
    stream_index: u32,
    title: Option<&str>,
    language: Option<&str>,
    codec: Option<&str>,
    channels: Option<u32>,
) -> String {
    let main = title
        .or(language)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Stream #{}", stream_index));
    let mut tech = Vec::new();
    if let Some(codec) = codec.filter(|c| !c.is_empty()) {
        tech.push(codec.to_string());
    }
    if let Some(ch) = channels {
        tech.push(format!("{}ch", ch));
    }
    if tech.is_empty() {
        main
    } else {
        format!("{} ({})", main, tech.join(" "))
    }
}

/// Parse `-show_format -show_streams` JSON into duration and audio tracks.
pub fn parse_media_json(json: &str) -> Result<(f64, Vec<AudioTrack>), ProbeError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| ProbeError::Unreadable(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .ok_or_else(|| ProbeError::Unreadable("ffprobe reported no duration".to_string()))?;

    let audio_tracks = output
        .streams
        .unwrap_or_default()
        .into_iter()
        .filter(|s| s.codec_type.as_deref().is_none_or(|t| t == "audio"))
        .enumerate()
        .map(|(position, s)| {
            let stream_index = s.index.unwrap_or(position as u32);
            let language = non_empty_tag(s.tags.as_ref(), "language");
            let title = non_empty_tag(s.tags.as_ref(), "title");
            let codec = s.codec_name.filter(|c| !c.is_empty());
            let label = audio_label(
                stream_index,
                title.as_deref(),
                language.as_deref(),
                codec.as_deref(),
                s.channels,
            );
            AudioTrack {
                stream_index,
                codec,
                language,
                title,
                channels: s.channels,
                label,
            }
        })
        .collect();

    Ok((duration, audio_tracks))
}

/// Parse `-show_entries packet=pts_time,flags` JSON; keeps packets flagged `K`.
pub fn parse_key_frames_json(json: &str) -> Result<Vec<f64>, ProbeError> {
    let output: FfprobePackets = serde_json::from_str(json).map_err(|e| {
        ProbeError::Unreadable(format!("Failed to parse ffprobe packet JSON: {}", e))
    })?;
    let mut timestamps: Vec<f64> = output
        .packets
        .into_iter()
        .filter(|p| p.flags.as_deref().is_some_and(|f| f.contains('K')))
        .filter_map(|p| p.pts_time?.trim().parse::<f64>().ok())
        .collect();
    normalize_timestamps(&mut timestamps);
    Ok(timestamps)
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// Run ffprobe once, killing it if it outlives `timeout`. Returns stdout.
fn run_ffprobe(ffprobe: &Path, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProbeError::NotFound(format!("ffprobe not found at {}", ffprobe.display()))
        } else {
            ProbeError::Unreadable(format!("Failed to run ffprobe: {}", e))
        }
    })?;

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                log::warn!(
                    target: "vid_slicer::ffmpeg::ffprobe",
                    "ffprobe exceeded {:?}; killed",
                    timeout
                );
                return Err(ProbeError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(ProbeError::Unreadable(format!("Failed to wait for ffprobe: {}", e)));
            }
        }
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        return Err(ProbeError::Unreadable(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }
    String::from_utf8(stdout)
        .map_err(|_| ProbeError::Unreadable("ffprobe output was not valid UTF-8".to_string()))
}

/// Probe with an explicit ffprobe binary. Key frames are only scanned when requested.
pub fn probe_with(
    ffprobe: &Path,
    path: &Path,
    with_key_frames: bool,
    timeout: Duration,
) -> Result<SourceMedia, ProbeError> {
    let path_str = path_to_string(path);
    log::debug!(
        target: "vid_slicer::ffmpeg::ffprobe",
        "probe: path={}, key_frames={}",
        path_str,
        with_key_frames
    );

    let json = run_ffprobe(
        ffprobe,
        &[
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "a",
            &path_str,
        ],
        timeout,
    )?;
    let (duration, audio_tracks) = parse_media_json(&json)?;

    let key_frame_timestamps = if with_key_frames {
        let json = run_ffprobe(
            ffprobe,
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "packet=pts_time,flags",
                "-of",
                "json",
                &path_str,
            ],
            timeout,
        )?;
        parse_key_frames_json(&json)?
    } else {
        Vec::new()
    };

    log::info!(
        target: "vid_slicer::ffmpeg::ffprobe",
        "Probed {}: duration={:.3}s, audio_tracks={}, key_frames={}",
        path_str,
        duration,
        audio_tracks.len(),
        key_frame_timestamps.len()
    );

    Ok(SourceMedia {
        path: path.to_path_buf(),
        total_duration_seconds: duration,
        key_frame_timestamps,
        audio_tracks,
    })
}

/// Probe a source file using the discovered ffprobe.
pub fn probe(path: &Path, with_key_frames: bool, timeout: Duration) -> Result<SourceMedia, ProbeError> {
    let ffprobe = ffprobe_path()?;
    probe_with(ffprobe, path, with_key_frames, timeout)
}

/// Audio tracks only; empty when probing fails.
pub fn list_audio_tracks(path: &Path, timeout: Duration) -> Vec<AudioTrack> {
    match probe(path, false, timeout) {
        Ok(media) => media.audio_tracks,
        Err(e) => {
            log::debug!(
                target: "vid_slicer::ffmpeg::ffprobe",
                "list_audio_tracks failed for {}: {}",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// `probe_with` on the blocking pool, for callers already on a runtime.
pub async fn probe_with_async(
    ffprobe: PathBuf,
    path: PathBuf,
    with_key_frames: bool,
    timeout: Duration,
) -> Result<SourceMedia, AppError> {
    tokio::task::spawn_blocking(move || probe_with(&ffprobe, &path, with_key_frames, timeout))
        .await
        .map_err(|e| AppError::from(e.to_string()))?
        .map_err(AppError::from)
}

/// `probe` on the blocking pool.
pub async fn probe_async(
    path: PathBuf,
    with_key_frames: bool,
    timeout: Duration,
) -> Result<SourceMedia, AppError> {
    let ffprobe = ffprobe_path()?.to_path_buf();
    probe_with_async(ffprobe, path, with_key_frames, timeout).await
}
