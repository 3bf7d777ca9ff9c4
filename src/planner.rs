//! Segment boundary planning.
//!
//! Boundaries fall every `segment_length_seconds`. In fast (stream-copy) mode each
//! boundary after the first snaps back to the nearest key frame at or before it,
//! since copied streams can only be cut there. A segment always ends where the next
//! one starts, so the plan covers `[0, total)` with no gaps or overlaps.

use std::path::{Path, PathBuf};

use crate::error::PlanError;
use crate::ffmpeg::SourceMedia;
use crate::options::SliceConfig;

/// Starts this close to the end of the media are float noise, not a real segment.
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Upper bound on segments in one plan.
pub const MAX_SEGMENTS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub output_path: PathBuf,
}

impl Segment {
    pub fn duration_seconds(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Largest key frame at or before `t`, if any.
fn snap_to_key_frame(key_frames: &[f64], t: f64) -> Option<f64> {
    let after = key_frames.partition_point(|&k| k <= t);
    after.checked_sub(1).map(|i| key_frames[i])
}

/// `<dir>/<stem>_<index:03>.<ext>`
pub fn segment_output_path(source: &Path, config: &SliceConfig, index: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "clip".to_string());
    config.output_directory.join(format!(
        "{}_{:03}.{}",
        stem, index, config.output_extension
    ))
}

fn boundary_starts(media: &SourceMedia, config: &SliceConfig, count: usize) -> Vec<f64> {
    let total = media.total_duration_seconds;
    let len = config.segment_length_seconds;

    let mut starts = vec![0.0];
    for i in 1..count {
        let candidate = i as f64 * len;
        if candidate >= total - BOUNDARY_EPSILON {
            break;
        }
        let start = if config.fast_mode {
            snap_to_key_frame(&media.key_frame_timestamps, candidate).unwrap_or(candidate)
        } else {
            candidate
        };
        // Sparse key frames can snap a boundary onto an earlier one; the previous
        // segment then absorbs this one.
        let previous = starts.last().copied().unwrap_or(0.0);
        if start <= previous {
            log::debug!(
                target: "vid_slicer::planner",
                "Dropping boundary {:.3}s: snapped to {:.3}s, not after {:.3}s",
                candidate,
                start,
                previous
            );
            continue;
        }
        starts.push(start);
    }
    starts
}

/// Plan the segments for `media`. Deterministic for identical inputs.
pub fn plan(media: &SourceMedia, config: &SliceConfig) -> Result<Vec<Segment>, PlanError> {
    config.validate()?;
    let total = media.total_duration_seconds;
    if !total.is_finite() || total <= 0.0 {
        return Err(PlanError::EmptyMedia);
    }

    let count = (total / config.segment_length_seconds).ceil().max(1.0);
    if count > MAX_SEGMENTS as f64 {
        return Err(PlanError::InvalidConfig(format!(
            "{}s at {}s per segment would produce {} segments (limit {})",
            total, config.segment_length_seconds, count, MAX_SEGMENTS
        )));
    }

    let starts = boundary_starts(media, config, count as usize);
    let segments: Vec<Segment> = starts
        .iter()
        .enumerate()
        .map(|(index, &start)| Segment {
            index,
            start_seconds: start,
            end_seconds: starts.get(index + 1).copied().unwrap_or(total),
            output_path: segment_output_path(&media.path, config, index),
        })
        .collect();

    log::info!(
        target: "vid_slicer::planner",
        "Planned {} segment(s) for {:.3}s at {}s each (fast_mode={})",
        segments.len(),
        total,
        config.segment_length_seconds,
        config.fast_mode
    );
    Ok(segments)
}
