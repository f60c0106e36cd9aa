//! End-to-end tests against the tracker simulator.
//!
//! These exercise the full recording and calibration lifecycle with real
//! producer threads: subscribe -> buffer -> consume -> stop, and
//! enter -> collect -> compute -> export -> apply -> leave, including the
//! forced-leave abort path.

#![cfg(feature = "testutils")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use gaze_stream::{
    BufferSide, CalibrationState, DataStream, DeviceStatus, EyeTracker, Gaze, LogEntry,
    NotificationKind, Point2, SimulatorBackend, SimulatorConfig, StreamOptions, TimeSync,
    TrackerBackend,
};
use gaze_stream::{EyeImage, Notification};

// The log sink is process-global; tests that use it take this lock so their
// start/drain/stop sequences don't interleave.
static LOG_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Polls `probe` until it returns true or the timeout expires.
fn wait_for(timeout: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn session() -> (Arc<SimulatorBackend>, EyeTracker) {
    session_with(SimulatorConfig::default())
}

fn session_with(config: SimulatorConfig) -> (Arc<SimulatorBackend>, EyeTracker) {
    let backend = Arc::new(SimulatorBackend::with_config(config));
    let tracker = EyeTracker::new(Arc::clone(&backend) as Arc<dyn TrackerBackend>);
    (backend, tracker)
}

#[test]
fn recording_lifecycle_and_stream_independence() {
    let (_backend, tracker) = session();

    assert!(tracker
        .start(DataStream::Gaze, Some(10_000), StreamOptions::default())
        .unwrap());
    assert!(tracker
        .start(DataStream::TimeSync, None, StreamOptions::default())
        .unwrap());
    assert!(tracker.is_recording(DataStream::Gaze));

    assert!(wait_for(Duration::from_secs(2), || {
        tracker.peek_n::<Gaze>(Some(1), BufferSide::Start).len() == 1
            && !tracker.peek_n::<TimeSync>(None, BufferSide::Start).is_empty()
    }));

    // Stopping gaze leaves time sync running, and buffered gaze samples
    // remain consumable after the stop.
    assert!(tracker.stop(DataStream::Gaze, None).unwrap());
    assert!(!tracker.is_recording(DataStream::Gaze));
    assert!(tracker.is_recording(DataStream::TimeSync));

    let samples = tracker.consume_n::<Gaze>(None, BufferSide::Start);
    assert!(!samples.is_empty());
    assert!(samples
        .windows(2)
        .all(|w| w[0].system_time_stamp <= w[1].system_time_stamp));
    assert!(tracker.consume_n::<Gaze>(None, BufferSide::Start).is_empty());

    assert!(tracker.stop(DataStream::TimeSync, Some(true)).unwrap());
    assert!(tracker.consume_n::<TimeSync>(None, BufferSide::Start).is_empty());
    // A second stop reports the stream was not recording.
    assert!(!tracker.stop(DataStream::TimeSync, None).unwrap());
}

#[test]
fn peeks_are_stable_under_a_live_producer() {
    let (_backend, tracker) = session();
    tracker
        .start(DataStream::Gaze, None, StreamOptions::default())
        .unwrap();

    assert!(wait_for(Duration::from_secs(2), || {
        tracker.peek_n::<Gaze>(Some(3), BufferSide::Start).len() == 3
    }));

    // The oldest records don't move while the producer appends at the tail.
    let first = tracker.peek_n::<Gaze>(Some(3), BufferSide::Start);
    let second = tracker.peek_n::<Gaze>(Some(3), BufferSide::Start);
    assert_eq!(first, second);

    // Time-range round trip against live data: peek a closed range, then
    // consume it, and it is gone while everything outside remains.
    let ranged = tracker.peek_time_range::<Gaze>(
        Some(first[0].device_time_stamp),
        Some(first[2].device_time_stamp),
    );
    assert_eq!(ranged.len(), 3);
    let consumed = tracker.consume_time_range::<Gaze>(
        Some(first[0].device_time_stamp),
        Some(first[2].device_time_stamp),
    );
    assert_eq!(consumed, first);
    assert!(tracker
        .consume_time_range::<Gaze>(
            Some(first[0].device_time_stamp),
            Some(first[2].device_time_stamp),
        )
        .is_empty());

    tracker.stop(DataStream::Gaze, Some(true)).unwrap();
}

#[test]
fn stream_options_shape_the_delivered_samples() {
    let (_backend, tracker) = session();

    tracker.set_include_eye_openness(true).unwrap();
    tracker
        .start(DataStream::Gaze, None, StreamOptions::default())
        .unwrap();
    tracker
        .start(DataStream::EyeImage, None, StreamOptions::as_gif())
        .unwrap();

    assert!(wait_for(Duration::from_secs(2), || {
        !tracker.peek_n::<Gaze>(Some(1), BufferSide::Start).is_empty()
            && !tracker
                .peek_n::<EyeImage>(Some(1), BufferSide::Start)
                .is_empty()
    }));

    let gaze = tracker.consume_n::<Gaze>(Some(1), BufferSide::Start);
    assert!(gaze[0].left_eye.eye_openness.available);

    let image = tracker.consume_n::<EyeImage>(Some(1), BufferSide::Start);
    assert!(image[0].is_gif);

    tracker.stop(DataStream::Gaze, Some(true)).unwrap();
    tracker.stop(DataStream::EyeImage, Some(true)).unwrap();
}

#[test]
fn full_calibration_flow_with_a_failing_point() {
    let bad_point = Point2::new(0.9, 0.9);
    let (backend, tracker) = session_with(SimulatorConfig {
        failing_points: vec![bad_point],
        ..SimulatorConfig::default()
    });

    assert!(tracker.enter_calibration_mode(false).unwrap());
    assert!(tracker.is_in_calibration_mode(None).unwrap());
    let enter = tracker.calibration_retrieve_result(true).unwrap();
    assert!(enter.status.is_ok());

    // Collect a centered five-point grid; the corner point is scripted to
    // fail on the device.
    let grid = [
        Point2::new(0.5, 0.5),
        Point2::new(0.1, 0.1),
        Point2::new(0.1, 0.9),
        Point2::new(0.9, 0.1),
        bad_point,
    ];
    let mut failures = 0;
    for point in grid {
        tracker.calibration_collect_data(point, None).unwrap();
        let result = tracker.calibration_retrieve_result(true).unwrap();
        if !result.status.is_ok() {
            assert_eq!(result.status, DeviceStatus::CalibrationFailure);
            failures += 1;
        }
    }
    assert_eq!(failures, 1);

    tracker.calibration_compute_and_apply().unwrap();
    let computed = tracker.calibration_retrieve_result(true).unwrap();
    let result = computed.calibration_result().unwrap();
    assert_eq!(result.points.len(), 4);

    tracker.calibration_get_data().unwrap();
    let exported = tracker.calibration_retrieve_result(true).unwrap();
    let blob = exported.calibration_data().unwrap().clone();

    tracker.calibration_apply_data(blob.clone()).unwrap();
    let applied = tracker.calibration_retrieve_result(true).unwrap();
    assert!(applied.status.is_ok());
    assert_eq!(backend.applied_calibration().unwrap(), blob);

    assert!(tracker.leave_calibration_mode(None).unwrap());
    assert_eq!(tracker.calibration_get_status(), CalibrationState::Left);
    assert!(tracker
        .calibration_collect_data(Point2::new(0.5, 0.5), None)
        .is_err());
}

#[test]
fn forced_leave_aborts_a_slow_collection() {
    let (_backend, tracker) = session_with(SimulatorConfig {
        collect_duration: Duration::from_secs(10),
        ..SimulatorConfig::default()
    });

    tracker.enter_calibration_mode(true).unwrap();
    tracker.calibration_retrieve_result(true).unwrap();

    tracker
        .calibration_collect_data(Point2::new(0.5, 0.5), None)
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        tracker.calibration_get_status() == CalibrationState::CollectingData
    }));

    // A plain leave is refused while collecting; a forced one aborts the
    // device call and exits promptly instead of waiting out the collection.
    assert!(tracker.leave_calibration_mode(None).is_err());
    let left_at = Instant::now();
    assert!(tracker.leave_calibration_mode(Some(true)).unwrap());

    let collect = tracker.calibration_retrieve_result(true).unwrap();
    assert_eq!(collect.status, DeviceStatus::OperationAborted);
    let exit = tracker.calibration_retrieve_result(true).unwrap();
    assert!(exit.status.is_ok());
    assert!(left_at.elapsed() < Duration::from_secs(5));
    assert_eq!(tracker.calibration_get_status(), CalibrationState::Left);

    // The session recovers: calibration mode can be entered again.
    assert!(tracker.enter_calibration_mode(false).unwrap());
    assert!(tracker.calibration_retrieve_result(true).unwrap().status.is_ok());
    tracker.leave_calibration_mode(None).unwrap();
}

#[test]
fn recording_continues_while_calibrating() {
    let (_backend, tracker) = session_with(SimulatorConfig {
        collect_duration: Duration::from_millis(100),
        ..SimulatorConfig::default()
    });

    tracker
        .start(DataStream::Gaze, None, StreamOptions::default())
        .unwrap();
    tracker.enter_calibration_mode(false).unwrap();
    tracker.calibration_retrieve_result(true).unwrap();

    tracker
        .calibration_collect_data(Point2::new(0.5, 0.5), None)
        .unwrap();

    // Gaze keeps flowing while the worker is collecting.
    let before = tracker.peek_n::<Gaze>(None, BufferSide::Start).len();
    assert!(wait_for(Duration::from_secs(2), || {
        tracker.peek_n::<Gaze>(None, BufferSide::Start).len() > before
    }));

    assert!(tracker.calibration_retrieve_result(true).unwrap().status.is_ok());
    tracker.leave_calibration_mode(None).unwrap();
    assert!(tracker.is_recording(DataStream::Gaze));
    tracker.stop(DataStream::Gaze, Some(true)).unwrap();
}

#[test]
fn connection_loss_surfaces_as_stream_error_and_notification() {
    let _guard = LOG_TEST_LOCK.lock().unwrap();
    let (backend, tracker) = session();

    tracker
        .start(DataStream::Notification, None, StreamOptions::default())
        .unwrap();
    assert!(gaze_stream::start_logging(None));

    backend.simulate_connection_loss();

    assert!(wait_for(Duration::from_secs(2), || {
        tracker
            .peek_n::<Notification>(None, BufferSide::Start)
            .iter()
            .any(|n| n.kind == NotificationKind::ConnectionLost)
    }));
    let entries = gaze_stream::get_log(Some(true));
    assert!(entries
        .iter()
        .any(|e| matches!(e, LogEntry::StreamError(err)
            if err.error == gaze_stream::StreamErrorKind::ConnectionLost)));

    gaze_stream::stop_logging();
    tracker.stop(DataStream::Notification, Some(true)).unwrap();
}

#[test]
fn notifications_and_logging_report_device_events() {
    let _guard = LOG_TEST_LOCK.lock().unwrap();
    let (_backend, tracker) = session();

    tracker
        .start(DataStream::Notification, None, StreamOptions::default())
        .unwrap();
    assert!(gaze_stream::start_logging(Some(256)));

    tracker.set_frequency(120.0).unwrap();
    tracker.enter_calibration_mode(false).unwrap();
    tracker.calibration_retrieve_result(true).unwrap();
    tracker.leave_calibration_mode(None).unwrap();
    tracker.calibration_retrieve_result(true).unwrap();

    assert!(wait_for(Duration::from_secs(2), || {
        let kinds: Vec<NotificationKind> = tracker
            .peek_n::<Notification>(None, BufferSide::Start)
            .iter()
            .map(|n| n.kind)
            .collect();
        kinds.contains(&NotificationKind::GazeOutputFrequencyChanged)
            && kinds.contains(&NotificationKind::CalibrationModeEntered)
            && kinds.contains(&NotificationKind::CalibrationModeLeft)
    }));

    let entries = gaze_stream::get_log(Some(true));
    assert!(entries.iter().any(|e| match e {
        LogEntry::Message(m) => m.message.contains("calibration mode entered"),
        LogEntry::StreamError(_) => false,
    }));
    assert!(gaze_stream::stop_logging());

    tracker.stop(DataStream::Notification, Some(true)).unwrap();
}
