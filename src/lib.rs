//! Buffered data streams and calibration control for research eye trackers.
//!
//! This crate sits between a tracker's driver (which delivers samples from
//! hardware callback threads at rates up to ~1200 Hz) and a single
//! synchronous caller, such as a stimulus-presentation script driving the
//! device through a foreign-language binding.
//!
//! # What it provides
//!
//! - **Stream buffering**: one [`StreamBuffer`] per data stream (gaze, eye
//!   images, external signal, time sync, positioning, notifications) with
//!   lock-light appends on the callback side and count- or time-range-based
//!   consumption on the caller side, in arrival order, without data loss.
//! - **Calibration control**: a [`CalibrationEngine`] that serializes
//!   calibration actions through a dedicated worker thread and reports each
//!   outcome as a [`CalibrationWorkResult`], so calibration can never race
//!   with recording.
//! - **Process-wide logging**: a global sink for driver log messages and
//!   stream errors ([`start_logging`]/[`get_log`]/[`stop_logging`]).
//! - **Session handles**: a generation-checked [`TrackerArena`] for binding
//!   layers that address sessions by integer handle.
//!
//! The device itself lives behind the [`TrackerBackend`] trait; this crate
//! contains no hardware access. A threaded `SimulatorBackend` is available
//! behind the `testutils` feature for development without a device.
//!
//! # Features
//!
//! - `serde`: serde derives on all public record and configuration types.
//! - `testutils`: expose the tracker simulator.
//!
//! # Example
//!
//! ```ignore
//! use gaze_stream::{BufferSide, DataStream, EyeTracker, Gaze, StreamOptions};
//!
//! let tracker = EyeTracker::new(backend);
//! tracker.start(DataStream::Gaze, None, StreamOptions::default())?;
//! // ... present stimuli ...
//! let trial: Vec<Gaze> = tracker.consume_n(None, BufferSide::Start);
//! tracker.stop(DataStream::Gaze, Some(true))?;
//! ```

pub mod backend;
pub mod buffer;
pub mod calibration;
mod error;
pub mod handles;
pub mod log_sink;
pub mod registry;
#[cfg(any(test, feature = "testutils"))]
pub mod simulator;
pub mod tracker;
pub mod types;

// Error types
pub use error::{Error, Result};

// Session and dispatch
pub use registry::{BufferRegistry, StreamData, StreamOptions};
pub use tracker::EyeTracker;

// Buffering
pub use buffer::StreamBuffer;

// Calibration
pub use calibration::{
    CalibrationAction, CalibrationEngine, CalibrationOutcome, CalibrationState,
    CalibrationWorkItem, CalibrationWorkResult,
};

// Backend seam
pub use backend::{
    DeviceError, DeviceResult, DeviceStatus, SampleSink, SubscribeOptions, TrackerBackend,
};

// Logging
pub use log_sink::{get_log, start_logging, stop_logging, LogSinkHandle};

// Handles
pub use handles::{TrackerArena, TrackerHandle};

// Record and metadata types
pub use types::{
    BufferSide, CalibrationData, CalibrationEyeValidity, CalibrationPoint, CalibrationResult,
    CalibrationSample, CalibrationStatus, Capabilities, DataStream, DisplayArea, ExtSignal, Eye,
    EyeData, EyeImage, EyeImageType, EyeOpenness, Gaze, GazeOrigin, GazePoint, LogEntry, LogLevel,
    LogMessage, LogSource, Notification, NotificationKind, Point2, Point3, Positioning, PupilData,
    SignalChange, StreamError, StreamErrorKind, StreamErrorSource, TimeRanged, TimeSync,
    TrackerInfo, UserPositionGuide,
};

// Simulator (testutils)
#[cfg(feature = "testutils")]
pub use simulator::{SimulatorBackend, SimulatorConfig};
