use crate::options::SliceConfig;
use crate::planner::Segment;

use super::path_to_string;

/// Re-encode target: interoperable H.264/AAC.
const REENCODE_VIDEO_CODEC: &str = "libx264";
const REENCODE_PRESET: &str = "veryfast";
const REENCODE_CRF: &str = "23";
const REENCODE_AUDIO_CODEC: &str = "aac";
const REENCODE_AUDIO_BITRATE: &str = "128k";

/// Seconds with millisecond-or-better precision, trailing zeros trimmed.
fn format_seconds(secs: f64) -> String {
    let s = format!("{:.6}", secs.max(0.0));
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() { "0".to_string() } else { s.to_string() }
}

fn audio_map(config: &SliceConfig) -> String {
    match config.audio_stream_index {
        Some(n) => format!("0:a:{}", n),
        // Trailing `?` keeps silent sources working.
        None => "0:a:0?".to_string(),
    }
}

/// FFmpeg args for one segment. Progress goes to stdout (`-progress pipe:1`).
pub fn build_segment_args(input_path: &str, segment: &Segment, config: &SliceConfig) -> Vec<String> {
    let output_path = path_to_string(&segment.output_path);

    log::debug!(
        target: "vid_slicer::ffmpeg::builder",
        "Building segment {} command: {}..{}s, fast_mode={}, input={} -> output={}",
        segment.index,
        segment.start_seconds,
        segment.end_seconds,
        config.fast_mode,
        input_path,
        output_path
    );

    let mut args: Vec<String> = [
        "-nostdin",
        "-hide_banner",
        "-nostats",
        "-y",
        "-progress",
        "pipe:1",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    args.extend([
        "-ss".to_string(),
        format_seconds(segment.start_seconds),
        "-i".to_string(),
        input_path.to_string(),
        "-t".to_string(),
        format_seconds(segment.duration_seconds()),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        audio_map(config),
    ]);

    if config.fast_mode {
        args.extend([
            "-c".to_string(),
            "copy".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
        ]);
    } else {
        args.extend([
            "-c:v".to_string(),
            REENCODE_VIDEO_CODEC.to_string(),
            "-preset".to_string(),
            REENCODE_PRESET.to_string(),
            "-crf".to_string(),
            REENCODE_CRF.to_string(),
            "-c:a".to_string(),
            REENCODE_AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            REENCODE_AUDIO_BITRATE.to_string(),
        ]);
    }

    if config.is_mp4_family() {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.push(output_path);
    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let takes_value = arg.starts_with('-') && args.get(i + 1).is_some_and(|v| !v.starts_with('-'));
        if takes_value {
            lines.push(format!("  {} {}", arg, args[i + 1]));
            i += 2;
        } else {
            lines.push(format!("  {}", arg));
            i += 1;
        }
    }
    lines.join("\n")
}
