//! Tracker backend trait: the seam to the device driver.
//!
//! Everything device-specific (discovery, connection, the vendor SDK) lives
//! behind [`TrackerBackend`]. The crate's side of the contract is small: a
//! backend delivers samples by calling [`StreamBuffer::push`] on the sink it
//! was handed at subscription (exactly one thread-safe append per callback,
//! no other work on the callback thread), and reports device-level failures
//! as [`DeviceError`] values rather than panicking.
//!
//! [`StreamBuffer::push`]: crate::buffer::StreamBuffer::push

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::buffer::StreamBuffer;
use crate::log_sink::LogSinkHandle;
use crate::types::{
    CalibrationData, CalibrationResult, DataStream, ExtSignal, Eye, EyeImage, Gaze, Notification,
    Point2, Positioning, TimeSync, TrackerInfo,
};

// =============================================================================
// Device status and errors
// =============================================================================

/// Status code a device operation completed with.
///
/// `Ok` means the device accepted and executed the operation. Everything
/// else is a device-side failure; these are data, not Rust errors, when they
/// describe the outcome of an asynchronous calibration action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceStatus {
    /// Operation succeeded.
    Ok,
    /// The device could not calibrate with the collected data.
    CalibrationFailure,
    /// The operation is invalid in the device's current state.
    InvalidOperation,
    /// The operation was aborted (forced calibration-mode leave).
    OperationAborted,
    /// The connection to the device was lost.
    ConnectionLost,
    /// Unspecified device or driver error.
    InternalError,
}

impl DeviceStatus {
    /// Returns the canonical string form of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "success",
            DeviceStatus::CalibrationFailure => "calibration failure",
            DeviceStatus::InvalidOperation => "invalid operation",
            DeviceStatus::OperationAborted => "operation aborted",
            DeviceStatus::ConnectionLost => "connection lost",
            DeviceStatus::InternalError => "internal error",
        }
    }

    /// Returns true for `Ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, DeviceStatus::Ok)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed device operation: a status code plus the driver's message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceError {
    pub status: DeviceStatus,
    pub message: String,
}

impl DeviceError {
    /// Creates a device error.
    pub fn new(status: DeviceStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error with a message.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(DeviceStatus::InvalidOperation, message)
    }

    /// Creates a connection-lost error with a message.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(DeviceStatus::ConnectionLost, message)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl StdError for DeviceError {}

/// Result type for device operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// =============================================================================
// Sample delivery
// =============================================================================

/// The typed buffer a backend delivers one stream's samples into.
///
/// Handed to [`TrackerBackend::subscribe`]; the backend keeps its variant's
/// `Arc` for the lifetime of the subscription and appends every callback's
/// record to it.
#[derive(Debug, Clone)]
pub enum SampleSink {
    Gaze(Arc<StreamBuffer<Gaze>>),
    EyeImage(Arc<StreamBuffer<EyeImage>>),
    ExternalSignal(Arc<StreamBuffer<ExtSignal>>),
    TimeSync(Arc<StreamBuffer<TimeSync>>),
    Positioning(Arc<StreamBuffer<Positioning>>),
    Notification(Arc<StreamBuffer<Notification>>),
}

impl SampleSink {
    /// The stream this sink receives.
    pub fn stream(&self) -> DataStream {
        match self {
            SampleSink::Gaze(_) => DataStream::Gaze,
            SampleSink::EyeImage(_) => DataStream::EyeImage,
            SampleSink::ExternalSignal(_) => DataStream::ExternalSignal,
            SampleSink::TimeSync(_) => DataStream::TimeSync,
            SampleSink::Positioning(_) => DataStream::Positioning,
            SampleSink::Notification(_) => DataStream::Notification,
        }
    }
}

/// Per-subscription delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscribeOptions {
    /// Deliver eye-openness data in gaze samples.
    pub include_eye_openness: bool,
    /// Deliver eye images GIF-encoded instead of as raw pixels.
    pub eye_images_as_gif: bool,
}

// =============================================================================
// TrackerBackend trait
// =============================================================================

/// Driver-side interface for one connected eye tracker.
///
/// Implementations are shared between the caller thread and the calibration
/// worker thread, hence `Send + Sync`. All methods are synchronous from the
/// caller's point of view; sample delivery happens on the backend's own
/// callback threads via the subscribed [`SampleSink`]s.
///
/// # Contract
///
/// 1. After `subscribe` returns, every sample the device produces for that
///    stream is appended to the sink, in production order, until
///    `unsubscribe` returns. No sample is delivered after `unsubscribe`.
/// 2. `system_time_stamp` values assigned to delivered samples are
///    non-decreasing per stream.
/// 3. Calibration methods are only called between a successful
///    `calibration_enter` and the matching `calibration_exit`, from one
///    thread at a time. `calibration_abort` is the exception: it may be
///    called from another thread while a calibration method is blocked, and
///    must cause that method to return promptly (typically with
///    [`DeviceStatus::OperationAborted`]).
/// 4. Device failures are `Err(DeviceError)`; a backend never panics across
///    this boundary.
pub trait TrackerBackend: Send + Sync {
    /// Static and configured properties of the device.
    fn info(&self) -> TrackerInfo;

    /// Sets the user-assigned device name.
    fn set_device_name(&self, name: &str) -> DeviceResult<()>;

    /// Sets the gaze output frequency, Hz.
    fn set_frequency(&self, frequency: f32) -> DeviceResult<()>;

    /// Sets the tracking mode.
    fn set_tracking_mode(&self, mode: &str) -> DeviceResult<()>;

    /// The host clock the backend stamps samples with, microseconds.
    fn system_time_stamp(&self) -> i64;

    /// Begins delivering a stream's samples into `sink`.
    fn subscribe(&self, sink: SampleSink, options: &SubscribeOptions) -> DeviceResult<()>;

    /// Stops delivering a stream's samples.
    fn unsubscribe(&self, stream: DataStream) -> DeviceResult<()>;

    /// Begins delivering log messages and stream errors into `sink`.
    fn subscribe_log(&self, sink: LogSinkHandle);

    /// Stops delivering log messages and stream errors.
    fn unsubscribe_log(&self);

    /// Puts the device into calibration mode.
    fn calibration_enter(&self, monocular: bool) -> DeviceResult<()>;

    /// Takes the device out of calibration mode.
    fn calibration_exit(&self) -> DeviceResult<()>;

    /// Collects calibration data for a stimulus point.
    fn calibration_collect(&self, point: Point2, eye: Option<Eye>) -> DeviceResult<()>;

    /// Discards previously collected data for a stimulus point.
    fn calibration_discard(&self, point: Point2, eye: Option<Eye>) -> DeviceResult<()>;

    /// Computes a calibration from the collected points and applies it.
    fn calibration_compute_apply(&self) -> DeviceResult<CalibrationResult>;

    /// Exports the active calibration as an opaque blob.
    fn calibration_get_data(&self) -> DeviceResult<CalibrationData>;

    /// Applies a previously exported calibration blob.
    fn calibration_apply_data(&self, data: &CalibrationData) -> DeviceResult<()>;

    /// Aborts whatever calibration operation is in flight (see Contract #3).
    fn calibration_abort(&self);
}
