//! Slicing job: one engine invocation per planned segment, run sequentially.
//!
//! `JobState` is a plain value owned by the caller. `run` borrows it mutably and
//! yields `(Segment, SegmentOutcome)` lazily; a failed segment is recorded and the
//! next one still runs. Cancellation goes through a cloned `CancelHandle`, which
//! can be used from another thread while the run holds the state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{AppError, SegmentFailure, StallWarning};
use crate::ffmpeg::{build_segment_args, path_to_string};
use crate::options::SliceConfig;
use crate::planner::Segment;
use crate::progress::ProgressAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Cancels a job from any thread: sets the flag checked between segments and
/// kills the in-flight engine process, if any.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    active: Arc<Mutex<Option<Child>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let child = self.active.lock().take();
        if let Some(mut child) = child {
            log::info!(target: "vid_slicer::job", "Terminating in-flight FFmpeg process");
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Park the running engine process so `cancel` can reach it. Hands the child
    /// back if the job was cancelled before it got here.
    pub fn install(&self, child: Child) -> Result<(), Child> {
        let mut guard = self.active.lock();
        if self.is_cancelled() {
            return Err(child);
        }
        *guard = Some(child);
        Ok(())
    }

    /// Reclaim the engine process. None means `cancel` already took and killed it.
    pub fn take_active(&self) -> Option<Child> {
        self.active.lock().take()
    }
}

/// Request cancellation of the job `handle` was taken from.
pub fn cancel(handle: &CancelHandle) {
    handle.cancel();
}

/// What the engine reports while a segment runs.
#[derive(Debug, Clone, Copy)]
pub enum EngineSignal<'a> {
    /// A line of status output.
    Status(&'a str),
    /// No output for one poll interval.
    Silent,
}

/// Runs one external transcoding invocation to completion.
pub trait TranscodeEngine {
    fn run_segment(
        &self,
        args: &[String],
        cancel: &CancelHandle,
        on_signal: &mut dyn FnMut(EngineSignal<'_>),
    ) -> Result<(), SegmentFailure>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Completed,
    Failed(SegmentFailure),
    Cancelled,
}

/// Events pushed to the caller while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { percent: f64, segment_index: usize },
    Stall(StallWarning),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    segments: Vec<Segment>,
    #[serde(skip)]
    invocations: Vec<Vec<String>>,
    completed_count: usize,
    attempted_count: usize,
    failed_segments: BTreeSet<usize>,
    #[serde(skip)]
    failures: BTreeMap<usize, SegmentFailure>,
    overall_status: JobStatus,
    #[serde(skip)]
    stall_threshold: std::time::Duration,
    #[serde(skip)]
    cancel: CancelHandle,
}

impl JobState {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Engine args for each segment, in segment order.
    pub fn invocations(&self) -> &[Vec<String>] {
        &self.invocations
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    /// Segments that have run to an outcome, successful or not.
    pub fn attempted_count(&self) -> usize {
        self.attempted_count
    }

    /// Segment indices (`Segment::index`) that failed.
    pub fn failed_segments(&self) -> &BTreeSet<usize> {
        &self.failed_segments
    }

    pub fn failure(&self, segment_index: usize) -> Option<&SegmentFailure> {
        self.failures.get(&segment_index)
    }

    pub fn overall_status(&self) -> JobStatus {
        self.overall_status
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Read-only copy for another thread or the UI.
    pub fn snapshot(&self) -> JobState {
        self.clone()
    }

    /// A fresh pending job for the failed segments' plan entries, with a new cancel handle.
    pub fn retry_failed(&self) -> JobState {
        let (segments, invocations) = self
            .segments
            .iter()
            .zip(&self.invocations)
            .filter(|(s, _)| self.failed_segments.contains(&s.index))
            .map(|(s, args)| (s.clone(), args.clone()))
            .unzip();
        JobState::pending(segments, invocations, self.stall_threshold)
    }

    fn pending(
        segments: Vec<Segment>,
        invocations: Vec<Vec<String>>,
        stall_threshold: std::time::Duration,
    ) -> Self {
        Self {
            segments,
            invocations,
            completed_count: 0,
            attempted_count: 0,
            failed_segments: BTreeSet::new(),
            failures: BTreeMap::new(),
            overall_status: JobStatus::Pending,
            stall_threshold,
            cancel: CancelHandle::default(),
        }
    }

    fn record(&mut self, segment: &Segment, outcome: &SegmentOutcome) {
        match outcome {
            SegmentOutcome::Completed => self.completed_count += 1,
            SegmentOutcome::Failed(failure) => {
                self.failed_segments.insert(segment.index);
                self.failures.insert(segment.index, failure.clone());
            }
            SegmentOutcome::Cancelled => return,
        }
        self.attempted_count += 1;
    }

    fn finish(&mut self) {
        self.overall_status = if self.failed_segments.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
    }

    #[cfg(test)]
    pub(crate) fn mark_attempt_for_test(&mut self, position: usize, ok: bool) {
        let segment = self.segments[position].clone();
        let outcome = if ok {
            SegmentOutcome::Completed
        } else {
            SegmentOutcome::Failed(SegmentFailure::non_zero_exit(1, "test"))
        };
        self.record(&segment, &outcome);
    }
}

/// Build the pending job for `segments` cut from `input_path`.
pub fn build(input_path: &Path, segments: Vec<Segment>, config: &SliceConfig) -> JobState {
    let input = path_to_string(input_path);
    let invocations = segments
        .iter()
        .map(|segment| build_segment_args(&input, segment, config))
        .collect();
    JobState::pending(segments, invocations, config.stall_threshold)
}

/// Start running `job`. Fails unless the job is still pending.
pub fn run<'a, E: TranscodeEngine + ?Sized>(
    job: &'a mut JobState,
    engine: &'a E,
) -> Result<JobRun<'a, E>, AppError> {
    if job.overall_status != JobStatus::Pending {
        return Err(AppError::JobNotPending(job.overall_status));
    }
    let aggregator = ProgressAggregator::new(job.stall_threshold);
    Ok(JobRun {
        job,
        engine,
        aggregator,
        on_event: None,
        done: false,
    })
}

/// Lazy, finite sequence of segment outcomes. Not restartable.
pub struct JobRun<'a, E: TranscodeEngine + ?Sized> {
    job: &'a mut JobState,
    engine: &'a E,
    aggregator: ProgressAggregator,
    on_event: Option<Box<dyn FnMut(JobEvent) + 'a>>,
    done: bool,
}

impl<'a, E: TranscodeEngine + ?Sized> JobRun<'a, E> {
    /// Subscribe to progress and stall events. Called on the thread driving the run.
    pub fn on_event(mut self, f: impl FnMut(JobEvent) + 'a) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    pub fn job(&self) -> &JobState {
        self.job
    }

    pub fn percent(&self) -> f64 {
        self.aggregator.percent()
    }

    fn emit(&mut self, event: JobEvent) {
        if let Some(cb) = self.on_event.as_mut() {
            cb(event);
        }
    }

    fn stop(&mut self, status: JobStatus) {
        self.job.overall_status = status;
        self.done = true;
        log::info!(
            target: "vid_slicer::job",
            "Job {:?}: {}/{} segment(s) completed, {} failed",
            status,
            self.job.completed_count,
            self.job.segments.len(),
            self.job.failed_segments.len()
        );
    }
}

impl<E: TranscodeEngine + ?Sized> Iterator for JobRun<'_, E> {
    type Item = (Segment, SegmentOutcome);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.job.cancel.is_cancelled() {
            self.stop(JobStatus::Cancelled);
            return None;
        }
        let position = self.job.attempted_count;
        let Some(segment) = self.job.segments.get(position).cloned() else {
            self.job.finish();
            let status = self.job.overall_status;
            self.stop(status);
            return None;
        };

        self.job.overall_status = JobStatus::Running;
        let args = self.job.invocations[position].clone();
        log::info!(
            target: "vid_slicer::job",
            "Segment {} ({}/{}): {:.3}s..{:.3}s -> {}",
            segment.index,
            position + 1,
            self.job.segments.len(),
            segment.start_seconds,
            segment.end_seconds,
            segment.output_path.display()
        );

        let result = {
            let JobRun {
                job,
                engine,
                aggregator,
                on_event,
                ..
            } = self;
            let job: &JobState = job;
            let cancel = job.cancel.clone();
            aggregator.segment_boundary(job);
            let mut on_signal = |signal: EngineSignal<'_>| {
                let progress = match signal {
                    EngineSignal::Status(line) => {
                        let before = aggregator.percent();
                        let percent = aggregator.update(job, line);
                        (percent > before).then_some(JobEvent::Progress {
                            percent,
                            segment_index: segment.index,
                        })
                    }
                    EngineSignal::Silent => None,
                };
                // Chatty output that never moves the position still counts as a stall.
                let stall = aggregator
                    .check_stall(job, Instant::now())
                    .map(JobEvent::Stall);
                if let Some(cb) = on_event.as_mut() {
                    progress.into_iter().chain(stall).for_each(cb);
                }
            };
            engine.run_segment(&args, &cancel, &mut on_signal)
        };

        let outcome = match result {
            Ok(()) => SegmentOutcome::Completed,
            Err(_) if self.job.cancel.is_cancelled() => SegmentOutcome::Cancelled,
            Err(failure) => {
                log::error!(target: "vid_slicer::job", "Segment {} failed: {}", segment.index, failure);
                SegmentOutcome::Failed(failure)
            }
        };
        self.job.record(&segment, &outcome);

        match &outcome {
            SegmentOutcome::Cancelled => self.stop(JobStatus::Cancelled),
            // No segment can succeed without the engine.
            SegmentOutcome::Failed(SegmentFailure::EngineNotFound(_)) => {
                self.stop(JobStatus::Failed)
            }
            _ => {
                let percent = self.aggregator.segment_boundary(self.job);
                self.emit(JobEvent::Progress {
                    percent,
                    segment_index: segment.index,
                });
                if self.job.attempted_count == self.job.segments.len() {
                    self.job.finish();
                    let status = self.job.overall_status;
                    self.stop(status);
                }
            }
        }

        Some((segment, outcome))
    }
}
