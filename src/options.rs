//! Caller-supplied slicing options and their validated form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::PlanError;

pub const DEFAULT_SEGMENT_SECONDS: f64 = 15.0;
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mp4";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(30);
/// Shortest accepted segment; below this FFmpeg's `-t` loses meaning.
pub const MIN_SEGMENT_SECONDS: f64 = 0.1;
/// Folder created next to the source when no output directory is given.
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "clips";

/// Options as they arrive over the wire. Every field is optional; `effective_*`
/// accessors supply defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SliceOptions {
    pub segment_seconds: Option<f64>,
    /// Stream-copy instead of re-encode. Cuts snap to key frames.
    pub fast_mode: Option<bool>,
    pub output_directory: Option<PathBuf>,
    /// Position among the source's audio streams (maps to `0:a:<n>`).
    pub audio_stream_index: Option<u32>,
    pub output_extension: Option<String>,
    pub probe_timeout_secs: Option<f64>,
    pub stall_threshold_secs: Option<f64>,
}

impl SliceOptions {
    pub fn effective_segment_seconds(&self) -> f64 {
        self.segment_seconds.unwrap_or(DEFAULT_SEGMENT_SECONDS)
    }

    pub fn effective_fast_mode(&self) -> bool {
        self.fast_mode.unwrap_or(false)
    }

    pub fn effective_output_directory(&self, source: &Path) -> PathBuf {
        match &self.output_directory {
            Some(dir) => dir.clone(),
            None => source
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_OUTPUT_DIR_NAME),
        }
    }

    pub fn effective_output_extension(&self) -> String {
        self.output_extension
            .as_deref()
            .map(|e| e.trim_start_matches('.'))
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_OUTPUT_EXTENSION)
            .to_lowercase()
    }

    pub fn effective_probe_timeout(&self) -> Duration {
        secs_or(self.probe_timeout_secs, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn effective_stall_threshold(&self) -> Duration {
        secs_or(self.stall_threshold_secs, DEFAULT_STALL_THRESHOLD)
    }

    /// Resolve defaults against `source` and validate.
    pub fn to_config(&self, source: &Path) -> Result<SliceConfig, PlanError> {
        let config = SliceConfig {
            segment_length_seconds: self.effective_segment_seconds(),
            fast_mode: self.effective_fast_mode(),
            output_directory: self.effective_output_directory(source),
            audio_stream_index: self.audio_stream_index,
            output_extension: self.effective_output_extension(),
            probe_timeout: self.effective_probe_timeout(),
            stall_threshold: self.effective_stall_threshold(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn secs_or(secs: Option<f64>, default: Duration) -> Duration {
    secs.filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceConfig {
    pub segment_length_seconds: f64,
    pub fast_mode: bool,
    pub output_directory: PathBuf,
    pub audio_stream_index: Option<u32>,
    pub output_extension: String,
    pub probe_timeout: Duration,
    pub stall_threshold: Duration,
}

impl SliceConfig {
    pub fn new(
        segment_length_seconds: f64,
        fast_mode: bool,
        output_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            segment_length_seconds,
            fast_mode,
            output_directory: output_directory.into(),
            audio_stream_index: None,
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let len = self.segment_length_seconds;
        if !len.is_finite() || len <= 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "segment length must be a positive number of seconds, got {}",
                len
            )));
        }
        if len < MIN_SEGMENT_SECONDS {
            return Err(PlanError::InvalidConfig(format!(
                "segment length must be at least {}s, got {}",
                MIN_SEGMENT_SECONDS, len
            )));
        }
        if self.output_extension.is_empty() {
            return Err(PlanError::InvalidConfig(
                "output extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Extensions whose muxer understands `-movflags +faststart`.
    pub fn is_mp4_family(&self) -> bool {
        matches!(self.output_extension.as_str(), "mp4" | "m4v" | "mov")
    }
}
