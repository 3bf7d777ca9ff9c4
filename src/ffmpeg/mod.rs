mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;

pub use builder::{build_segment_args, format_args_for_display_multiline};
pub use discovery::{ffmpeg_path, ffprobe_path, is_ffmpeg_available};
pub use error::{EngineErrorPayload, summarize_engine_error};
pub use ffprobe::{AudioTrack, SourceMedia, list_audio_tracks, probe, probe_async};
pub use progress::{StatusLine, parse_status_line};
pub use runner::FfmpegEngine;

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
