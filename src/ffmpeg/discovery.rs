use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use crate::error::{ProbeError, SegmentFailure};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Directory with binaries shipped alongside the app. Overrides `<exe dir>/resources`.
pub const RESOURCES_DIR_ENV: &str = "VID_SLICER_RESOURCES";
pub const FFMPEG_ENV: &str = "VID_SLICER_FFMPEG";
pub const FFPROBE_ENV: &str = "VID_SLICER_FFPROBE";
/// Conventional override honoured for ffmpeg only.
const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();
static FFPROBE_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Where to look for a tool, in order: bundled resources, executable dir, PATH.
#[derive(Debug, Clone, Default)]
pub struct SearchDirs {
    pub resources: Option<PathBuf>,
    pub exe_dir: Option<PathBuf>,
    pub search_path: bool,
}

impl SearchDirs {
    pub fn from_env() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let resources = std::env::var_os(RESOURCES_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| exe_dir.as_ref().map(|d| d.join("resources")));
        Self {
            resources,
            exe_dir,
            search_path: true,
        }
    }
}

fn candidate_names(tool: &str) -> Vec<String> {
    let mut names = vec![tool.to_string()];
    if cfg!(windows) && !tool.ends_with(".exe") {
        names.push(format!("{}.exe", tool));
    }
    names
}

fn find_in_dir(dir: &Path, tool: &str) -> Option<PathBuf> {
    candidate_names(tool)
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

#[cfg(target_os = "windows")]
fn find_in_path(tool: &str) -> Option<PathBuf> {
    let output = Command::new("where")
        .arg(tool)
        .stderr(Stdio::null())
        .creation_flags(0x08000000) // CREATE_NO_WINDOW
        .output()
        .ok()?;
    first_line_path(output)
}

#[cfg(not(target_os = "windows"))]
fn find_in_path(tool: &str) -> Option<PathBuf> {
    let output = Command::new("which")
        .arg(tool)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    first_line_path(output)
}

fn first_line_path(output: std::process::Output) -> Option<PathBuf> {
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

/// Search `dirs` for `tool` without touching the process-wide cache.
pub fn locate_tool(tool: &str, dirs: &SearchDirs) -> Option<PathBuf> {
    let fixed = [dirs.resources.as_deref(), dirs.exe_dir.as_deref()];
    for (label, dir) in ["bundled resources", "executable dir"].iter().zip(fixed) {
        if let Some(found) = dir.and_then(|d| find_in_dir(d, tool)) {
            log::debug!(
                target: "vid_slicer::ffmpeg::discovery",
                "{} found in {}: {}",
                tool,
                label,
                found.display()
            );
            return Some(found);
        }
    }
    if dirs.search_path
        && let Some(found) = find_in_path(tool).filter(|p| p.exists())
    {
        log::debug!(
            target: "vid_slicer::ffmpeg::discovery",
            "{} found in PATH: {}",
            tool,
            found.display()
        );
        return Some(found);
    }
    None
}

fn env_override(keys: &[&str]) -> Option<PathBuf> {
    keys.iter().find_map(|key| {
        let p = PathBuf::from(std::env::var_os(key)?);
        if p.exists() {
            log::debug!(
                target: "vid_slicer::ffmpeg::discovery",
                "Using {} from env: {}",
                key,
                p.display()
            );
            Some(p)
        } else {
            log::warn!(
                target: "vid_slicer::ffmpeg::discovery",
                "{} points at a missing file: {}",
                key,
                p.display()
            );
            None
        }
    })
}

fn resolve_cached(
    cache: &'static OnceLock<PathBuf>,
    tool: &str,
    env_keys: &[&str],
) -> Option<&'static Path> {
    if let Some(path) = cache.get() {
        return Some(path.as_path());
    }
    let path = env_override(env_keys).or_else(|| locate_tool(tool, &SearchDirs::from_env()))?;
    // Another thread may have won the race; either value is a valid resolution.
    let _ = cache.set(path);
    cache.get().map(PathBuf::as_path)
}

fn not_found_message(tool: &str) -> String {
    format!(
        "{tool} not found. Place it in the bundled resources folder, next to the application, or install it on your PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
    )
}

/// Get ffmpeg path. Cached for process lifetime.
pub fn ffmpeg_path() -> Result<&'static Path, SegmentFailure> {
    resolve_cached(&FFMPEG_PATH_CACHE, FFMPEG, &[FFMPEG_ENV, FFMPEG_PATH_ENV]).ok_or_else(|| {
        log::error!(target: "vid_slicer::ffmpeg::discovery", "FFmpeg not found");
        SegmentFailure::EngineNotFound(not_found_message(FFMPEG))
    })
}

/// Get ffprobe path. Cached for process lifetime.
pub fn ffprobe_path() -> Result<&'static Path, ProbeError> {
    resolve_cached(&FFPROBE_PATH_CACHE, FFPROBE, &[FFPROBE_ENV]).ok_or_else(|| {
        log::error!(target: "vid_slicer::ffmpeg::discovery", "ffprobe not found");
        ProbeError::NotFound(not_found_message(FFPROBE))
    })
}

/// True when ffmpeg resolves and `ffmpeg -version` exits cleanly.
pub fn is_ffmpeg_available() -> bool {
    let Ok(path) = ffmpeg_path() else {
        return false;
    };
    let mut cmd = Command::new(path);
    cmd.arg("-version").stdout(Stdio::null()).stderr(Stdio::null());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    cmd.status().map(|s| s.success()).unwrap_or(false)
}
