//! Overall job progress from per-invocation ffmpeg status lines.
//!
//! ffmpeg reports the position inside the segment it is cutting. The job-level
//! percentage is `(attempted + fraction) / segments * 100`, held monotonic.

use std::time::{Duration, Instant};

use crate::error::StallWarning;
use crate::ffmpeg::{StatusLine, parse_status_line};
use crate::job::JobState;

#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    stall_threshold: Duration,
    last_percent: f64,
    /// Furthest position seen in the current invocation.
    last_position: Option<f64>,
    last_advance_at: Instant,
    stall_reported: bool,
}

impl ProgressAggregator {
    pub fn new(stall_threshold: Duration) -> Self {
        Self {
            stall_threshold,
            last_percent: 0.0,
            last_position: None,
            last_advance_at: Instant::now(),
            stall_reported: false,
        }
    }

    pub fn percent(&self) -> f64 {
        self.last_percent
    }

    pub fn update(&mut self, job: &JobState, raw_status_line: &str) -> f64 {
        self.update_at(job, raw_status_line, Instant::now())
    }

    /// Malformed lines leave the percentage and the stall clock untouched. Only a
    /// position past the furthest one seen, or `progress=end`, restarts the stall
    /// clock; heartbeats and repeated positions do not.
    pub fn update_at(&mut self, job: &JobState, raw_status_line: &str, now: Instant) -> f64 {
        let Some(status) = parse_status_line(raw_status_line) else {
            return self.last_percent;
        };

        let fraction = match status {
            StatusLine::Heartbeat => return self.last_percent,
            StatusLine::End => {
                self.rearm(now);
                1.0
            }
            StatusLine::Position(secs) => {
                if self.last_position.is_none_or(|p| secs > p) {
                    self.last_position = Some(secs);
                    self.rearm(now);
                }
                match job.segments().get(job.attempted_count()) {
                    Some(segment) if segment.duration_seconds() > 0.0 => {
                        (secs / segment.duration_seconds()).clamp(0.0, 1.0)
                    }
                    _ => 0.0,
                }
            }
        };
        self.record(job, fraction)
    }

    /// Recompute after the job's attempted count changed; restarts the stall clock.
    pub fn segment_boundary(&mut self, job: &JobState) -> f64 {
        self.segment_boundary_at(job, Instant::now())
    }

    pub fn segment_boundary_at(&mut self, job: &JobState, now: Instant) -> f64 {
        self.last_position = None;
        self.rearm(now);
        self.record(job, 0.0)
    }

    /// Reported once per stretch without forward progress; the next advance re-arms it.
    pub fn check_stall(&mut self, job: &JobState, now: Instant) -> Option<StallWarning> {
        let silent = now.saturating_duration_since(self.last_advance_at);
        if self.stall_reported || silent < self.stall_threshold {
            return None;
        }
        self.stall_reported = true;
        let warning = StallWarning {
            segment_index: job
                .segments()
                .get(job.attempted_count())
                .map(|s| s.index)
                .unwrap_or(job.attempted_count()),
            silent_secs: silent.as_secs_f64(),
        };
        log::warn!(target: "vid_slicer::progress", "{}", warning);
        Some(warning)
    }

    fn rearm(&mut self, now: Instant) {
        self.last_advance_at = now;
        self.stall_reported = false;
    }

    fn record(&mut self, job: &JobState, fraction: f64) -> f64 {
        let total = job.segments().len();
        if total == 0 {
            return self.last_percent;
        }
        let done = job.attempted_count().min(total) as f64;
        let overall = ((done + fraction) / total as f64 * 100.0).clamp(0.0, 100.0);
        if overall > self.last_percent {
            self.last_percent = overall;
        }
        self.last_percent
    }
}
