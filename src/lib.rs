pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod options;
pub mod planner;
pub mod progress;
pub mod sidecar_api;

pub use error::{AppError, PlanError, ProbeError, SegmentFailure, StallWarning};
pub use ffmpeg::{SourceMedia, is_ffmpeg_available, list_audio_tracks, probe};
pub use job::{CancelHandle, JobState, JobStatus, SegmentOutcome, TranscodeEngine, build, cancel, run};
pub use options::{SliceConfig, SliceOptions};
pub use planner::{Segment, plan};
pub use progress::ProgressAggregator;
pub use sidecar_api::slice_video;
