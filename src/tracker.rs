//! One eye-tracker session: buffered streams plus calibration control.
//!
//! [`EyeTracker`] is the crate's front door. It owns the
//! [`BufferRegistry`] and the [`CalibrationEngine`] for one connected device
//! and exposes the narrow synchronous surface foreign bindings are built on:
//! start/stop/consume/peek per stream, the calibration operations, and the
//! device property getters and setters. All methods return only after the
//! operation completes; none of them spawns concurrency of its own.

use std::sync::Arc;

use crate::backend::TrackerBackend;
use crate::calibration::{CalibrationEngine, CalibrationState, CalibrationWorkResult};
use crate::error::Result;
use crate::log_sink::LogSinkHandle;
use crate::registry::{BufferRegistry, StreamData, StreamOptions};
use crate::types::{BufferSide, CalibrationData, DataStream, Eye, Point2, TimeRanged, TrackerInfo};

/// A session with one connected eye tracker.
///
/// # Example
///
/// ```ignore
/// let tracker = EyeTracker::new(backend);
/// tracker.start(DataStream::Gaze, None, StreamOptions::default())?;
/// // ... run the trial ...
/// let samples: Vec<Gaze> = tracker.consume_n(None, BufferSide::Start);
/// tracker.stop(DataStream::Gaze, Some(true))?;
/// ```
pub struct EyeTracker {
    backend: Arc<dyn TrackerBackend>,
    registry: BufferRegistry,
    calibration: CalibrationEngine,
}

impl EyeTracker {
    /// Creates a session over a connected backend.
    ///
    /// Log delivery is wired up immediately; entries only accumulate while
    /// the process-wide sink is active (see
    /// [`start_logging`](crate::log_sink::start_logging)).
    pub fn new(backend: Arc<dyn TrackerBackend>) -> Self {
        backend.subscribe_log(LogSinkHandle::new());
        Self {
            registry: BufferRegistry::new(Arc::clone(&backend)),
            calibration: CalibrationEngine::new(Arc::clone(&backend)),
            backend,
        }
    }

    // =========================================================================
    // Device properties
    // =========================================================================

    /// Static and configured properties of the device.
    pub fn info(&self) -> TrackerInfo {
        self.backend.info()
    }

    /// Sets the user-assigned device name.
    pub fn set_device_name(&self, name: &str) -> Result<()> {
        Ok(self.backend.set_device_name(name)?)
    }

    /// Sets the gaze output frequency, Hz.
    pub fn set_frequency(&self, frequency: f32) -> Result<()> {
        Ok(self.backend.set_frequency(frequency)?)
    }

    /// Sets the tracking mode.
    pub fn set_tracking_mode(&self, mode: &str) -> Result<()> {
        Ok(self.backend.set_tracking_mode(mode)?)
    }

    /// The host clock samples are stamped with, microseconds.
    pub fn system_time_stamp(&self) -> i64 {
        self.backend.system_time_stamp()
    }

    // =========================================================================
    // Data streams
    // =========================================================================

    /// Returns whether the device provides this stream, independent of
    /// whether it is being buffered.
    pub fn has_stream(&self, stream: DataStream) -> bool {
        self.registry.has_stream(stream)
    }

    /// Starts buffering a stream. See [`BufferRegistry::start`].
    pub fn start(
        &self,
        stream: DataStream,
        buf_size_hint: Option<usize>,
        options: StreamOptions,
    ) -> Result<bool> {
        self.registry.start(stream, buf_size_hint, options)
    }

    /// Returns whether a stream is currently being buffered.
    pub fn is_recording(&self, stream: DataStream) -> bool {
        self.registry.is_recording(stream)
    }

    /// Stops buffering a stream, optionally clearing its buffer. Returns
    /// false if the stream was not recording.
    pub fn stop(&self, stream: DataStream, clear: Option<bool>) -> Result<bool> {
        self.registry.stop(stream, clear)
    }

    /// Removes and returns up to `n` records of a stream, oldest first by
    /// default. See [`StreamBuffer::consume_n`].
    ///
    /// [`StreamBuffer::consume_n`]: crate::buffer::StreamBuffer::consume_n
    pub fn consume_n<T: StreamData>(&self, n: Option<usize>, side: BufferSide) -> Vec<T> {
        self.registry.consume_n(n, side)
    }

    /// Non-destructive twin of [`consume_n`](Self::consume_n).
    pub fn peek_n<T: StreamData>(&self, n: Option<usize>, side: BufferSide) -> Vec<T> {
        self.registry.peek_n(n, side)
    }

    /// Removes and returns a stream's records inside a device-clock time
    /// range. Streams without range timestamps (positioning) reject this at
    /// the type level.
    pub fn consume_time_range<T: StreamData + TimeRanged>(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Vec<T> {
        self.registry.consume_time_range(start, end)
    }

    /// Non-destructive twin of
    /// [`consume_time_range`](Self::consume_time_range).
    pub fn peek_time_range<T: StreamData + TimeRanged>(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Vec<T> {
        self.registry.peek_time_range(start, end)
    }

    /// Discards all buffered records of a stream.
    pub fn clear(&self, stream: DataStream) {
        self.registry.clear(stream)
    }

    /// Discards a stream's records inside a time range. Rejected for the
    /// positioning stream.
    pub fn clear_time_range(
        &self,
        stream: DataStream,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<()> {
        self.registry.clear_time_range(stream, start, end)
    }

    /// Enables or disables eye-openness delivery in gaze samples.
    pub fn set_include_eye_openness(&self, include: bool) -> Result<()> {
        self.registry.set_include_eye_openness(include)
    }

    // =========================================================================
    // Calibration
    // =========================================================================

    /// Enters calibration mode. Returns false if already in it.
    pub fn enter_calibration_mode(&self, monocular: bool) -> Result<bool> {
        self.calibration.enter_calibration_mode(monocular)
    }

    /// Returns whether the session is in calibration mode; optionally turns
    /// a "no" into the caller error the gated operations would raise.
    pub fn is_in_calibration_mode(&self, issue_error_if_not: Option<bool>) -> Result<bool> {
        self.calibration.is_in_calibration_mode(issue_error_if_not)
    }

    /// Leaves calibration mode; `force` aborts an in-flight action first.
    pub fn leave_calibration_mode(&self, force: Option<bool>) -> Result<bool> {
        self.calibration.leave_calibration_mode(force)
    }

    /// Queues data collection for a stimulus point.
    pub fn calibration_collect_data(&self, point: Point2, eye: Option<Eye>) -> Result<()> {
        self.calibration.collect_data(point, eye)
    }

    /// Queues discarding of a stimulus point's collected data.
    pub fn calibration_discard_data(&self, point: Point2, eye: Option<Eye>) -> Result<()> {
        self.calibration.discard_data(point, eye)
    }

    /// Queues computing and applying a calibration.
    pub fn calibration_compute_and_apply(&self) -> Result<()> {
        self.calibration.compute_and_apply()
    }

    /// Queues exporting the active calibration.
    pub fn calibration_get_data(&self) -> Result<()> {
        self.calibration.get_data()
    }

    /// Queues applying a previously exported calibration blob.
    pub fn calibration_apply_data(&self, data: CalibrationData) -> Result<()> {
        self.calibration.apply_data(data)
    }

    /// The current calibration state.
    pub fn calibration_get_status(&self) -> CalibrationState {
        self.calibration.get_status()
    }

    /// Retrieves the next completed calibration work result.
    pub fn calibration_retrieve_result(&self, blocking: bool) -> Option<CalibrationWorkResult> {
        self.calibration.retrieve_result(blocking)
    }
}

impl Drop for EyeTracker {
    fn drop(&mut self) {
        // Best-effort teardown; the calibration engine handles its own
        // worker in its Drop.
        for &stream in DataStream::all() {
            let _ = self.registry.stop(stream, Some(false));
        }
        self.backend.unsubscribe_log();
    }
}
