//! Error types for the gaze-stream crate.

use std::error::Error as StdError;
use std::fmt;

use crate::backend::DeviceError;
use crate::types::DataStream;

// =============================================================================
// Error
// =============================================================================

/// Errors reported synchronously to the caller.
///
/// These cover caller mistakes (bad identifiers, operations issued in the
/// wrong state) and resource failures. Device-side calibration failures are
/// NOT errors: they travel in
/// [`CalibrationWorkResult::status`](crate::calibration::CalibrationWorkResult),
/// so the caller can inspect the outcome and decide whether to retry.
/// Expected conditions such as an empty buffer are plain values (an empty
/// `Vec`), never errors.
#[derive(Debug)]
pub enum Error {
    /// A stream identifier string did not name a known data stream.
    UnknownStream(String),

    /// A buffer side identifier string was not `start` or `end`.
    UnknownBufferSide(String),

    /// An eye selector string was not `left`, `right` or `both`.
    UnknownEye(String),

    /// The operation is not defined for this stream
    /// (e.g. time-range access on the positioning stream).
    UnsupportedStreamOperation {
        /// The stream the operation was attempted on.
        stream: DataStream,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// The connected device does not provide this stream.
    StreamNotSupported(DataStream),

    /// A calibration operation was issued outside calibration mode.
    NotInCalibrationMode,

    /// A calibration action was submitted while another is still executing.
    CalibrationBusy(crate::calibration::CalibrationState),

    /// Buffer storage could not be reserved.
    BufferAllocation {
        /// The stream whose buffer failed to allocate.
        stream: DataStream,
        /// The requested capacity, in records.
        requested: usize,
    },

    /// The device driver rejected an operation (wrapped).
    Device(DeviceError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownStream(name) => write!(
                f,
                "unknown data stream \"{}\": expected one of 'gaze', 'eyeImage', \
                 'externalSignal', 'timeSync', 'positioning', or 'notification'",
                name
            ),
            Error::UnknownBufferSide(name) => write!(
                f,
                "unknown buffer side \"{}\": expected 'start' or 'end'",
                name
            ),
            Error::UnknownEye(name) => write!(
                f,
                "unknown eye selector \"{}\": expected 'left', 'right' or 'both'",
                name
            ),
            Error::UnsupportedStreamOperation { stream, operation } => {
                write!(f, "{} is not supported for the {} stream", operation, stream)
            }
            Error::StreamNotSupported(stream) => {
                write!(f, "the connected device has no {} stream", stream)
            }
            Error::NotInCalibrationMode => write!(
                f,
                "not in calibration mode: call enter_calibration_mode first"
            ),
            Error::CalibrationBusy(state) => write!(
                f,
                "a calibration action is still executing (state: {}); \
                 retrieve its result before submitting another",
                state
            ),
            Error::BufferAllocation { stream, requested } => write!(
                f,
                "could not reserve {} records of buffer storage for the {} stream",
                requested, stream
            ),
            Error::Device(e) => write!(f, "device error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Create an unknown-stream error from the offending identifier.
    pub fn unknown_stream(name: impl Into<String>) -> Self {
        Error::UnknownStream(name.into())
    }

    /// Create an unsupported-operation error for a stream.
    pub fn unsupported(stream: DataStream, operation: &'static str) -> Self {
        Error::UnsupportedStreamOperation { stream, operation }
    }

    /// Returns true if this is a caller error (misuse of the API) as opposed
    /// to a resource or device failure.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, Error::BufferAllocation { .. } | Error::Device(_))
    }

    /// Returns true if this is an UnsupportedStreamOperation error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedStreamOperation { .. })
    }

    /// Returns true if this is a CalibrationBusy error.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::CalibrationBusy(_))
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Error::Device(err)
    }
}

/// Result type for gaze-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
