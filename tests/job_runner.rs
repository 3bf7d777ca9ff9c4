//! Job execution against a scripted engine; no FFmpeg needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use vid_slicer_core::error::SegmentFailure;
use vid_slicer_core::job::{
    CancelHandle, EngineSignal, JobEvent, JobStatus, SegmentOutcome, TranscodeEngine, build, run,
};
use vid_slicer_core::options::SliceConfig;
use vid_slicer_core::{SourceMedia, plan};

/// Emits a position halfway through each segment, then `progress=end`.
/// Fails on the listed invocation numbers.
struct FakeEngine {
    fail_on: Vec<usize>,
    calls: AtomicUsize,
}

impl FakeEngine {
    fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

impl TranscodeEngine for FakeEngine {
    fn run_segment(
        &self,
        args: &[String],
        _cancel: &CancelHandle,
        on_signal: &mut dyn FnMut(EngineSignal<'_>),
    ) -> Result<(), SegmentFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let duration: f64 = args
            .iter()
            .position(|a| a == "-t")
            .and_then(|i| args.get(i + 1))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let half = format!("out_time_us={}", (duration / 2.0 * 1_000_000.0) as u64);
        on_signal(EngineSignal::Status(&half));
        on_signal(EngineSignal::Status("bitrate=N/A"));
        on_signal(EngineSignal::Status("progress=end"));
        if self.fail_on.contains(&call) {
            Err(SegmentFailure::non_zero_exit(1, "Error while decoding stream"))
        } else {
            Ok(())
        }
    }
}

fn planned_job(total: f64, len: f64) -> vid_slicer_core::JobState {
    let media = SourceMedia::new("/videos/lecture.mkv", total);
    let config = SliceConfig::new(len, false, "/clips");
    let segments = plan(&media, &config).expect("plan");
    build(&media.path, segments, &config)
}

#[test]
fn planned_job_runs_every_segment_in_order() {
    let mut job = planned_job(40.0, 15.0);
    let engine = FakeEngine::failing_on(vec![]);
    let indices: Vec<usize> = run(&mut job, &engine)
        .expect("run")
        .map(|(segment, outcome)| {
            assert_eq!(outcome, SegmentOutcome::Completed);
            segment.index
        })
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(job.overall_status(), JobStatus::Completed);
    assert!(job.invocations()[2].contains(&"/clips/lecture_002.mp4".to_string()));
}

#[test]
fn failure_at_k_leaves_other_segments_completed() {
    for k in 0..4 {
        let mut job = planned_job(60.0, 15.0);
        let engine = FakeEngine::failing_on(vec![k]);
        let outcomes: Vec<_> = run(&mut job, &engine).expect("run").collect();
        assert_eq!(outcomes.len(), 4);
        for (i, (_, outcome)) in outcomes.iter().enumerate() {
            if i == k {
                assert!(matches!(outcome, SegmentOutcome::Failed(_)));
            } else {
                assert_eq!(*outcome, SegmentOutcome::Completed);
            }
        }
        assert_eq!(job.overall_status(), JobStatus::Failed);
        assert_eq!(job.completed_count(), 3);
    }
}

#[test]
fn progress_is_monotonic_and_ends_at_100() {
    let mut job = planned_job(100.0, 15.0);
    let engine = FakeEngine::failing_on(vec![2]);
    let mut percents = Vec::new();
    run(&mut job, &engine)
        .expect("run")
        .on_event(|event| {
            if let JobEvent::Progress { percent, .. } = event {
                percents.push(percent);
            }
        })
        .for_each(drop);
    assert!(!percents.is_empty());
    assert!(percents.iter().all(|p| (0.0..=100.0).contains(p)));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.last().copied(), Some(100.0));
}

#[test]
fn retry_reruns_only_failed_segments() {
    let mut job = planned_job(60.0, 15.0);
    run(&mut job, &FakeEngine::failing_on(vec![1, 3]))
        .expect("run")
        .for_each(drop);

    let mut retry = job.retry_failed();
    let engine = FakeEngine::failing_on(vec![]);
    let indices: Vec<usize> = run(&mut retry, &engine)
        .expect("retry")
        .map(|(segment, _)| segment.index)
        .collect();
    assert_eq!(indices, vec![1, 3]);
    assert_eq!(retry.overall_status(), JobStatus::Completed);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

/// Blocks until cancelled, like a long-running encode.
struct BlockingEngine;

impl TranscodeEngine for BlockingEngine {
    fn run_segment(
        &self,
        _args: &[String],
        cancel: &CancelHandle,
        on_signal: &mut dyn FnMut(EngineSignal<'_>),
    ) -> Result<(), SegmentFailure> {
        while !cancel.is_cancelled() {
            on_signal(EngineSignal::Silent);
            thread::sleep(Duration::from_millis(5));
        }
        Err(SegmentFailure::non_zero_exit(255, "Exiting normally, received signal 15."))
    }
}

#[test]
fn cancel_from_another_thread_stops_the_job() {
    let mut job = planned_job(40.0, 15.0);
    let handle = job.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        vid_slicer_core::cancel(&handle);
    });

    let outcomes: Vec<_> = run(&mut job, &BlockingEngine).expect("run").collect();
    canceller.join().expect("join");

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1, SegmentOutcome::Cancelled);
    assert_eq!(job.overall_status(), JobStatus::Cancelled);
    assert!(job.failed_segments().is_empty());
}

#[test]
fn snapshot_is_independent_of_later_progress() {
    let mut job = planned_job(30.0, 15.0);
    let before = job.snapshot();
    run(&mut job, &FakeEngine::failing_on(vec![])).expect("run").for_each(drop);
    assert_eq!(before.overall_status(), JobStatus::Pending);
    assert_eq!(before.completed_count(), 0);
    assert_eq!(job.completed_count(), 2);
}

#[test]
fn job_state_serializes_for_display() {
    let job = planned_job(20.0, 15.0);
    let value = serde_json::to_value(job.snapshot()).expect("serialize");
    assert_eq!(value["overallStatus"], "pending");
    assert_eq!(value["segments"][1]["startSeconds"], 15.0);
    assert!(value.get("invocations").is_none());
}

#[test]
fn engine_missing_fails_whole_job() {
    struct Missing;
    impl TranscodeEngine for Missing {
        fn run_segment(
            &self,
            _args: &[String],
            _cancel: &CancelHandle,
            _on_signal: &mut dyn FnMut(EngineSignal<'_>),
        ) -> Result<(), SegmentFailure> {
            Err(SegmentFailure::EngineNotFound("FFmpeg not found".into()))
        }
    }

    let mut job = planned_job(60.0, 15.0);
    let outcomes: Vec<_> = run(&mut job, &Missing).expect("run").collect();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(job.overall_status(), JobStatus::Failed);
    assert_eq!(job.attempted_count(), 1);
}
