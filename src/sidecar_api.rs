use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AppError, SegmentFailure, StallWarning};
use crate::ffmpeg::{
    AudioTrack, EngineErrorPayload, FfmpegEngine, SourceMedia, build_segment_args,
    format_args_for_display_multiline, path_to_string, probe_async, summarize_engine_error,
};
use crate::job::{self, JobEvent, JobState, JobStatus, SegmentOutcome, TranscodeEngine};
use crate::options::{SliceConfig, SliceOptions};
use crate::planner::{self, Segment, segment_output_path};

const PROTOCOL_VERSION: u8 = 1;

/// Placeholder shown in command previews when no input is chosen yet.
const INPUT_PLACEHOLDER: &str = "<input>";

pub type SidecarEventEmitter = Arc<dyn Fn(SliceEvent) + Send + Sync>;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<String>,
}

fn block_on_async<T>(future: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::from(format!("Failed to initialize async runtime: {}", e)))?;
    runtime.block_on(future)
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg_available: crate::ffmpeg::is_ffmpeg_available(),
        ffmpeg_path: crate::ffmpeg::ffmpeg_path().ok().map(path_to_string),
        ffprobe_path: crate::ffmpeg::ffprobe_path().ok().map(path_to_string),
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfoResult {
    pub path: String,
    pub duration: f64,
    pub audio_tracks: Vec<AudioTrack>,
    /// Only present when key frames were scanned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_frame_count: Option<usize>,
}

impl From<SourceMedia> for MediaInfoResult {
    fn from(media: SourceMedia) -> Self {
        let key_frame_count =
            (!media.key_frame_timestamps.is_empty()).then_some(media.key_frame_timestamps.len());
        Self {
            path: path_to_string(&media.path),
            duration: media.total_duration_seconds,
            audio_tracks: media.audio_tracks,
            key_frame_count,
        }
    }
}

fn probe_for(input_path: &Path, options: &SliceOptions) -> Result<SourceMedia, AppError> {
    // Key frames only matter when cuts have to land on them.
    block_on_async(probe_async(
        input_path.to_path_buf(),
        options.effective_fast_mode(),
        options.effective_probe_timeout(),
    ))
}

pub fn get_media_info(input_path: PathBuf, options: SliceOptions) -> Result<MediaInfoResult, AppError> {
    Ok(probe_for(&input_path, &options)?.into())
}

pub fn list_audio_tracks(input_path: PathBuf, options: SliceOptions) -> Vec<AudioTrack> {
    crate::ffmpeg::list_audio_tracks(&input_path, options.effective_probe_timeout())
}

pub fn preview_plan(input_path: PathBuf, options: SliceOptions) -> Result<Vec<Segment>, AppError> {
    let config = options.to_config(&input_path)?;
    let media = probe_for(&input_path, &options)?;
    Ok(planner::plan(&media, &config)?)
}

/// Display form of the first segment's invocation. Needs no probe.
pub fn preview_slice_command(options: SliceOptions, input_path: Option<String>) -> String {
    let input_str = input_path.as_deref().unwrap_or(INPUT_PLACEHOLDER);
    let source = Path::new(input_str);
    let args = match options.to_config(source) {
        Ok(config) => {
            let segment = Segment {
                index: 0,
                start_seconds: 0.0,
                end_seconds: config.segment_length_seconds,
                output_path: segment_output_path(source, &config, 0),
            };
            build_segment_args(input_str, &segment, &config)
        }
        Err(e) => vec!["# error".into(), e.to_string()],
    };
    format!("ffmpeg\n{}", format_args_for_display_multiline(&args))
}

/// Pushed to the sidecar while a slice runs.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SliceEvent {
    #[serde(rename_all = "camelCase")]
    Progress { percent: f64, segment_index: usize },
    Segment(SegmentReport),
    Stall(StallWarning),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentReport {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub output_path: String,
    pub status: SegmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineErrorPayload>,
}

fn failure_payload(failure: &SegmentFailure) -> EngineErrorPayload {
    match failure {
        SegmentFailure::EngineNonZeroExit { code, stderr } => {
            summarize_engine_error(stderr, Some(*code))
        }
        SegmentFailure::EngineNotFound(message) => EngineErrorPayload {
            summary: "FFmpeg not found.".to_string(),
            detail: message.clone(),
        },
    }
}

impl SegmentReport {
    fn new(segment: &Segment, outcome: &SegmentOutcome) -> Self {
        let (status, error) = match outcome {
            SegmentOutcome::Completed => (SegmentStatus::Completed, None),
            SegmentOutcome::Failed(failure) => (SegmentStatus::Failed, Some(failure_payload(failure))),
            SegmentOutcome::Cancelled => (SegmentStatus::Cancelled, None),
        };
        Self {
            index: segment.index,
            start_seconds: segment.start_seconds,
            end_seconds: segment.end_seconds,
            output_path: path_to_string(&segment.output_path),
            status,
            error,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceResult {
    pub status: JobStatus,
    pub output_directory: String,
    pub planned: usize,
    pub completed: usize,
    pub failed_segments: Vec<usize>,
    pub segments: Vec<SegmentReport>,
}

/// A probed, planned and built slice, ready to run. The job's cancel handle
/// can be taken before running.
#[derive(Debug)]
pub struct PreparedSlice {
    pub media: SourceMedia,
    pub config: SliceConfig,
    pub job: JobState,
}

impl PreparedSlice {
    /// Plan and build from media that is already probed.
    pub fn from_media(media: SourceMedia, config: SliceConfig) -> Result<Self, AppError> {
        let segments = planner::plan(&media, &config)?;
        let job = job::build(&media.path, segments, &config);
        Ok(Self { media, config, job })
    }
}

pub fn prepare_slice(input_path: PathBuf, options: &SliceOptions) -> Result<PreparedSlice, AppError> {
    let config = options.to_config(&input_path)?;
    let media = probe_for(&input_path, options)?;
    PreparedSlice::from_media(media, config)
}

/// Run every segment of `prepared`, creating the output directory first.
pub fn run_prepared_slice<E: TranscodeEngine + ?Sized>(
    prepared: &mut PreparedSlice,
    engine: &E,
    event_emitter: Option<&SidecarEventEmitter>,
) -> Result<SliceResult, AppError> {
    fs::create_dir_all(&prepared.config.output_directory)?;
    log::info!(
        target: "vid_slicer::sidecar_api",
        "Slicing {} into {} segment(s) under {}",
        prepared.media.path.display(),
        prepared.job.segments().len(),
        prepared.config.output_directory.display()
    );

    let mut reports = Vec::with_capacity(prepared.job.segments().len());
    let emit = |event: SliceEvent| {
        if let Some(emitter) = event_emitter {
            emitter(event);
        }
    };
    let run = job::run(&mut prepared.job, engine)?.on_event(|event| match event {
        JobEvent::Progress {
            percent,
            segment_index,
        } => emit(SliceEvent::Progress {
            percent,
            segment_index,
        }),
        JobEvent::Stall(warning) => emit(SliceEvent::Stall(warning)),
    });
    for (segment, outcome) in run {
        let report = SegmentReport::new(&segment, &outcome);
        emit(SliceEvent::Segment(report.clone()));
        reports.push(report);
    }

    let job = &prepared.job;
    Ok(SliceResult {
        status: job.overall_status(),
        output_directory: path_to_string(&prepared.config.output_directory),
        planned: job.segments().len(),
        completed: job.completed_count(),
        failed_segments: job.failed_segments().iter().copied().collect(),
        segments: reports,
    })
}

/// Probe, plan, build and run in one call with the discovered ffmpeg.
pub fn slice_video(
    input_path: PathBuf,
    options: SliceOptions,
    event_emitter: Option<SidecarEventEmitter>,
) -> Result<SliceResult, AppError> {
    let mut prepared = prepare_slice(input_path, &options)?;
    run_prepared_slice(&mut prepared, &FfmpegEngine::new(), event_emitter.as_ref())
}
