//! Error taxonomy for probing, planning and running a slicing job.
//! `AppError` is the umbrella type surfaced to the sidecar; it serializes to
//! `{summary, detail}` for the frontend.

use std::time::Duration;

use crate::ffmpeg::summarize_engine_error;
use crate::job::JobStatus;

/// Failures of the media-inspection step. Abort the job before any engine process starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    NotFound(String),

    #[error("Unreadable media: {0}")]
    Unreadable(String),

    #[error("ffprobe timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Media has no duration to slice")]
    EmptyMedia,

    #[error("Invalid slice config: {0}")]
    InvalidConfig(String),
}

/// Per-segment engine failure. Recorded in `JobState`; only `EngineNotFound` ends the job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentFailure {
    #[error("FFmpeg failed (code {code}): {stderr}")]
    EngineNonZeroExit { code: i32, stderr: String },

    #[error("{0}")]
    EngineNotFound(String),
}

impl SegmentFailure {
    pub fn non_zero_exit(code: i32, stderr: impl Into<String>) -> Self {
        Self::EngineNonZeroExit {
            code,
            stderr: stderr.into(),
        }
    }

    /// Captured stderr, if the engine got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::EngineNonZeroExit { stderr, .. } => Some(stderr),
            Self::EngineNotFound(_) => None,
        }
    }
}

/// Non-fatal: the engine has been silent for longer than the stall threshold.
#[derive(Debug, Clone, PartialEq, serde::Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("No progress from segment {segment_index} for {silent_secs:.1}s")]
pub struct StallWarning {
    pub segment_index: usize,
    pub silent_secs: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Segment(#[from] SegmentFailure),

    #[error("Job already {0:?}; build a new job to run again")]
    JobNotPending(JobStatus),

    #[error("Aborted")]
    Aborted,

    #[error("{0}")]
    Message(String),
}

impl AppError {
    /// Short line for display plus the full text for an expandable detail view.
    pub fn summary_and_detail(&self) -> (String, String) {
        match self {
            AppError::Segment(SegmentFailure::EngineNonZeroExit { code, stderr }) => {
                let payload = summarize_engine_error(stderr, Some(*code));
                (payload.summary, payload.detail)
            }
            _ => {
                let text = self.to_string();
                (text.clone(), text)
            }
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let (summary, detail) = self.summary_and_detail();
        let json = serde_json::json!({ "summary": summary, "detail": detail });
        serializer.serialize_str(&json.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::Message(s)
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
