#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

pub enum VideoKind {
    Plain,
    /// Sparse key frames: one every `gop` frames at 30 fps.
    KeyFrameEvery(u32),
    MultiAudio(u32),
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = vid_slicer_core::ffmpeg::ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_test_video(&self, input_name: &str, duration_secs: f32, kind: VideoKind) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: VideoKind,
) -> std::io::Result<ExitStatus> {
    let duration_arg = format!("{}", duration_secs);
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_arg),
    ];

    let audio_tracks = match kind {
        VideoKind::MultiAudio(n) => n,
        _ => 1,
    };
    for i in 0..audio_tracks {
        let freq = 440 + (i as i32) * 220;
        args.push("-f".to_string());
        args.push("lavfi".to_string());
        args.push("-i".to_string());
        args.push(format!("sine=frequency={}:duration={}", freq, duration_arg));
    }
    args.push("-map".to_string());
    args.push("0:v".to_string());
    for i in 0..audio_tracks {
        args.push("-map".to_string());
        args.push(format!("{}:a", i + 1));
    }

    args.extend(
        ["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"]
            .into_iter()
            .map(String::from),
    );
    if let VideoKind::KeyFrameEvery(gop) = kind {
        args.push("-g".to_string());
        args.push(gop.to_string());
        args.push("-keyint_min".to_string());
        args.push(gop.to_string());
        args.push("-sc_threshold".to_string());
        args.push("0".to_string());
    }
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-shortest".to_string());
    args.push(output_path.to_string_lossy().to_string());

    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// Container duration of a produced clip, via ffprobe.
pub fn clip_duration(path: &Path) -> f64 {
    vid_slicer_core::ffmpeg::probe(path, false, std::time::Duration::from_secs(30))
        .expect("probe clip")
        .total_duration_seconds
}
