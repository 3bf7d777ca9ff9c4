#![cfg(feature = "integration-test-api")]

mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use support::{IntegrationEnv, VideoKind, clip_duration};
use vid_slicer_core::ffmpeg::{FfmpegEngine, probe};
use vid_slicer_core::job::JobStatus;
use vid_slicer_core::options::SliceOptions;
use vid_slicer_core::sidecar_api::{
    SidecarEventEmitter, SliceEvent, prepare_slice, run_prepared_slice, slice_video,
};

#[test]
fn reencode_slices_into_expected_clips() {
    let env = IntegrationEnv::new();
    let input_path = env.with_test_video("talk.mp4", 5.0, VideoKind::Plain);
    let options = SliceOptions {
        segment_seconds: Some(2.0),
        output_directory: Some(env.path("clips")),
        ..Default::default()
    };

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let emitter: SidecarEventEmitter = Arc::new(move |e| sink.lock().push(e));
    let result = slice_video(input_path, options, Some(emitter)).expect("slice");

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.planned, 3);
    for name in ["talk_000.mp4", "talk_001.mp4", "talk_002.mp4"] {
        let clip = env.path("clips").join(name);
        assert!(clip.exists(), "{} missing", name);
    }
    let first = clip_duration(&env.path("clips").join("talk_000.mp4"));
    assert!((first - 2.0).abs() < 0.2, "first clip duration {}", first);

    let percents: Vec<f64> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            SliceEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last().copied(), Some(100.0));
}

#[test]
fn fast_mode_cuts_on_key_frames() {
    let env = IntegrationEnv::new();
    // Key frames every 1.5s at 30 fps.
    let input_path = env.with_test_video("gop.mp4", 6.0, VideoKind::KeyFrameEvery(45));
    let media = probe(&input_path, true, Duration::from_secs(30)).expect("probe");
    assert!(media.key_frame_timestamps.len() >= 3);

    let options = SliceOptions {
        segment_seconds: Some(2.0),
        fast_mode: Some(true),
        output_directory: Some(env.path("fast")),
        ..Default::default()
    };
    let mut prepared = prepare_slice(input_path, &options).expect("prepare");
    for segment in &prepared.job.segments()[1..] {
        assert!(
            media
                .key_frame_timestamps
                .iter()
                .any(|k| (k - segment.start_seconds).abs() < 1e-6),
            "segment {} starts off a key frame at {}",
            segment.index,
            segment.start_seconds
        );
    }
    let result = run_prepared_slice(&mut prepared, &FfmpegEngine::new(), None).expect("run");
    assert_eq!(result.status, JobStatus::Completed);
}

#[test]
fn audio_tracks_are_listed_in_mapping_order() {
    let env = IntegrationEnv::new();
    let input_path = env.with_test_video("multi.mp4", 2.0, VideoKind::MultiAudio(2));
    let tracks = vid_slicer_core::list_audio_tracks(&input_path, Duration::from_secs(30));
    assert_eq!(tracks.len(), 2);
    assert!(tracks[0].stream_index < tracks[1].stream_index);
    assert!(tracks[0].label.contains("aac"), "label {}", tracks[0].label);
}

#[test]
fn unreadable_input_fails_before_slicing() {
    let env = IntegrationEnv::new();
    let bogus = env.path("not-a-video.mp4");
    std::fs::write(&bogus, b"definitely not media").expect("write");
    let options = SliceOptions {
        output_directory: Some(env.path("never")),
        ..Default::default()
    };
    let err = slice_video(bogus, options, None).expect_err("should fail");
    assert!(matches!(err, vid_slicer_core::AppError::Probe(_)), "{:?}", err);
    assert!(!env.path("never").exists());
}
