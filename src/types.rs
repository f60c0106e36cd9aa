//! Data types for eye-tracker telemetry.
//!
//! Provides the stream identifiers, the immutable sample record for each
//! stream kind, and the tracker metadata types. Records are plain values:
//! they carry whatever the device reported at one instant and never change
//! after construction.
//!
//! # Timestamps
//!
//! Records carry up to two clocks, both in microseconds:
//!
//! - `device_time_stamp`: the tracking hardware's clock. Used for time-range
//!   queries; may exhibit small jitter and is not guaranteed monotonic.
//! - `system_time_stamp`: the host clock at arrival. Non-decreasing in push
//!   order within one stream buffer, which is what the ordering guarantees
//!   are built on.

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// Stream identifiers
// =============================================================================

/// The data streams an eye tracker can deliver.
///
/// The string form (as used by foreign-language bindings) is the canonical
/// camel-case name: `gaze`, `eyeImage`, `externalSignal`, `timeSync`,
/// `positioning`, `notification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataStream {
    /// Binocular gaze samples.
    Gaze,
    /// Camera images of the eyes.
    EyeImage,
    /// TTL/external sync signal transitions.
    ExternalSignal,
    /// Host/device clock synchronization samples.
    TimeSync,
    /// Head-positioning guide samples.
    Positioning,
    /// Device notifications (mode changes, faults, connection events).
    Notification,
}

impl DataStream {
    /// Returns all data streams.
    pub fn all() -> &'static [DataStream] {
        &[
            DataStream::Gaze,
            DataStream::EyeImage,
            DataStream::ExternalSignal,
            DataStream::TimeSync,
            DataStream::Positioning,
            DataStream::Notification,
        ]
    }

    /// Returns the canonical identifier string for this stream.
    pub fn name(&self) -> &'static str {
        match self {
            DataStream::Gaze => "gaze",
            DataStream::EyeImage => "eyeImage",
            DataStream::ExternalSignal => "externalSignal",
            DataStream::TimeSync => "timeSync",
            DataStream::Positioning => "positioning",
            DataStream::Notification => "notification",
        }
    }

    /// Returns whether time-range operations are defined for this stream.
    ///
    /// Positioning samples carry no timestamp, so there is nothing to range
    /// on; all other streams support time-range access.
    pub fn supports_time_range(&self) -> bool {
        !matches!(self, DataStream::Positioning)
    }

    /// The device capability required for this stream, if any.
    ///
    /// Time sync, positioning and notifications are provided by every
    /// supported device and require no specific capability.
    pub fn required_capability(&self) -> Option<Capabilities> {
        match self {
            DataStream::Gaze => Some(Capabilities::HAS_GAZE_DATA),
            DataStream::EyeImage => Some(Capabilities::HAS_EYE_IMAGES),
            DataStream::ExternalSignal => Some(Capabilities::HAS_EXTERNAL_SIGNAL),
            DataStream::TimeSync | DataStream::Positioning | DataStream::Notification => None,
        }
    }
}

impl fmt::Display for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DataStream {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaze" => Ok(DataStream::Gaze),
            "eyeImage" => Ok(DataStream::EyeImage),
            "externalSignal" => Ok(DataStream::ExternalSignal),
            "timeSync" => Ok(DataStream::TimeSync),
            "positioning" => Ok(DataStream::Positioning),
            "notification" => Ok(DataStream::Notification),
            other => Err(Error::unknown_stream(other)),
        }
    }
}

/// Which end of a buffer count-bounded operations take records from.
///
/// `Start` selects the oldest records, `End` the newest. Either way the
/// returned records keep their internal arrival order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferSide {
    /// Take the oldest records (the default).
    #[default]
    Start,
    /// Take the newest records.
    End,
}

impl fmt::Display for BufferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferSide::Start => write!(f, "start"),
            BufferSide::End => write!(f, "end"),
        }
    }
}

impl FromStr for BufferSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(BufferSide::Start),
            "end" => Ok(BufferSide::End),
            other => Err(Error::UnknownBufferSide(other.to_string())),
        }
    }
}

/// Eye selector for monocular calibration actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Eye {
    /// Left eye only.
    Left,
    /// Right eye only.
    Right,
    /// Both eyes (the default).
    #[default]
    Both,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => write!(f, "left"),
            Eye::Right => write!(f, "right"),
            Eye::Both => write!(f, "both"),
        }
    }
}

impl FromStr for Eye {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Eye::Left),
            "right" => Ok(Eye::Right),
            "both" => Ok(Eye::Both),
            other => Err(Error::UnknownEye(other.to_string())),
        }
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// A 2D point in normalized display-area coordinates (0.0 to 1.0 per axis).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    /// Creates a new point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A 3D point in millimeters, in the device's user coordinate system.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Creates a new point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// The physical extent of the display the tracker is calibrated against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisplayArea {
    pub bottom_left: Point3,
    pub bottom_right: Point3,
    pub top_left: Point3,
    pub top_right: Point3,
    /// Width in millimeters.
    pub width: f32,
    /// Height in millimeters.
    pub height: f32,
}

// =============================================================================
// Time-range selection
// =============================================================================

/// Records that carry a timestamp usable for time-range queries.
///
/// Most streams range on the device clock. Time-sync records range on the
/// system request timestamp and notifications on their system timestamp,
/// since neither has a meaningful device-clock ordering of its own.
/// Positioning records carry no timestamp at all and deliberately do not
/// implement this trait.
pub trait TimeRanged {
    /// The timestamp compared against time-range bounds, in microseconds.
    fn range_time(&self) -> i64;
}

// =============================================================================
// Gaze
// =============================================================================

/// Where one eye is looking, on screen and in 3D space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GazePoint {
    /// Intersection of the gaze ray with the display, normalized coordinates.
    pub position_on_display_area: Point2,
    /// The same intersection in the user coordinate system, millimeters.
    pub position_in_user_coordinates: Point3,
    /// Whether the device judged this sample valid.
    pub valid: bool,
    /// Whether the device produced this field at all.
    pub available: bool,
}

/// Pupil diameter measurement for one eye.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PupilData {
    /// Diameter in millimeters.
    pub diameter: f32,
    pub valid: bool,
    pub available: bool,
}

/// The 3D origin of one eye's gaze ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GazeOrigin {
    /// Position in the user coordinate system, millimeters.
    pub position_in_user_coordinates: Point3,
    /// Position in normalized track-box coordinates.
    pub position_in_track_box_coordinates: Point3,
    pub valid: bool,
    pub available: bool,
}

/// Eye-openness measurement for one eye.
///
/// Only populated when eye-openness delivery is enabled for the gaze stream;
/// `available` is false otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EyeOpenness {
    /// Eyelid aperture in millimeters.
    pub diameter: f32,
    pub valid: bool,
    pub available: bool,
}

/// Everything the tracker reports about one eye in one gaze sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EyeData {
    pub gaze_point: GazePoint,
    pub pupil: PupilData,
    pub gaze_origin: GazeOrigin,
    pub eye_openness: EyeOpenness,
}

/// One binocular gaze sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gaze {
    /// Device clock at capture, microseconds.
    pub device_time_stamp: i64,
    /// Host clock at arrival, microseconds.
    pub system_time_stamp: i64,
    pub left_eye: EyeData,
    pub right_eye: EyeData,
}

impl TimeRanged for Gaze {
    fn range_time(&self) -> i64 {
        self.device_time_stamp
    }
}

// =============================================================================
// Eye images
// =============================================================================

/// What portion of the sensor an eye image covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EyeImageType {
    /// Full sensor frame.
    Full,
    /// Cropped region around one eye.
    Cropped,
    /// Multiple regions of interest in one frame.
    MultiRoi,
    /// Unrecognized image type reported by the device.
    Unknown,
}

/// One eye-camera image.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EyeImage {
    pub device_time_stamp: i64,
    pub system_time_stamp: i64,
    /// Identifier of the sensor region this image came from.
    pub region_id: u32,
    /// Top edge of the region on the full sensor, pixels.
    pub region_top: u32,
    /// Left edge of the region on the full sensor, pixels.
    pub region_left: u32,
    pub bits_per_pixel: u32,
    pub padding_per_pixel: u32,
    pub width: u32,
    pub height: u32,
    pub kind: EyeImageType,
    /// Which eye camera produced this image.
    pub camera_id: u32,
    /// Whether `image` holds GIF-encoded data instead of raw pixels.
    pub is_gif: bool,
    /// Pixel or GIF data, row-major.
    pub image: Vec<u8>,
}

impl TimeRanged for EyeImage {
    fn range_time(&self) -> i64 {
        self.device_time_stamp
    }
}

// =============================================================================
// External signal
// =============================================================================

/// Why an external-signal sample was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SignalChange {
    /// The signal value changed.
    ValueChanged,
    /// Initial value reported at subscription.
    Initial,
}

/// One sample of the device's external sync signal port.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtSignal {
    pub device_time_stamp: i64,
    pub system_time_stamp: i64,
    /// The signal port value.
    pub value: i64,
    pub change_type: SignalChange,
}

impl TimeRanged for ExtSignal {
    fn range_time(&self) -> i64 {
        self.device_time_stamp
    }
}

// =============================================================================
// Time sync
// =============================================================================

/// One clock-synchronization exchange between host and device.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeSync {
    /// Host clock when the sync request was sent, microseconds.
    pub system_request_time_stamp: i64,
    /// Device clock when the request was received, microseconds.
    pub device_time_stamp: i64,
    /// Host clock when the response arrived, microseconds.
    pub system_response_time_stamp: i64,
}

impl TimeRanged for TimeSync {
    // Ranged on the request timestamp: it is the one clock in this record
    // that is on the host timeline and strictly ordered per exchange.
    fn range_time(&self) -> i64 {
        self.system_request_time_stamp
    }
}

// =============================================================================
// Positioning
// =============================================================================

/// Head-position guide for one eye.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UserPositionGuide {
    /// Eye position in normalized track-box coordinates.
    pub user_position: Point3,
    pub valid: bool,
}

/// One head-positioning sample. Carries no timestamps; positioning is a live
/// guide stream, not a recording stream, so time-range operations reject it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Positioning {
    pub left: UserPositionGuide,
    pub right: UserPositionGuide,
}

// =============================================================================
// Notifications
// =============================================================================

/// The notification events a device can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NotificationKind {
    ConnectionLost,
    ConnectionRestored,
    CalibrationModeEntered,
    CalibrationModeLeft,
    CalibrationChanged,
    TrackBoxChanged,
    DisplayAreaChanged,
    GazeOutputFrequencyChanged,
    EyeTrackingModeChanged,
    DeviceFaults,
    DeviceWarnings,
}

impl NotificationKind {
    /// A short human-readable explanation of the event.
    pub fn explanation(&self) -> &'static str {
        match self {
            NotificationKind::ConnectionLost => "the connection to the device was lost",
            NotificationKind::ConnectionRestored => "the connection to the device was restored",
            NotificationKind::CalibrationModeEntered => "the device entered calibration mode",
            NotificationKind::CalibrationModeLeft => "the device left calibration mode",
            NotificationKind::CalibrationChanged => "a different calibration was applied",
            NotificationKind::TrackBoxChanged => "the track box changed",
            NotificationKind::DisplayAreaChanged => "the display area changed",
            NotificationKind::GazeOutputFrequencyChanged => "the gaze output frequency changed",
            NotificationKind::EyeTrackingModeChanged => "the eye-tracking mode changed",
            NotificationKind::DeviceFaults => "the device reported faults",
            NotificationKind::DeviceWarnings => "the device reported warnings",
        }
    }
}

/// One device notification.
///
/// At most one of the payload fields is set, determined by `kind`:
/// a frequency change carries `output_frequency`, a display-area change
/// carries `display_area`, faults/warnings carry `errors_or_warnings`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Notification {
    pub system_time_stamp: i64,
    pub kind: NotificationKind,
    pub output_frequency: Option<f32>,
    pub display_area: Option<DisplayArea>,
    pub errors_or_warnings: Option<String>,
}

impl Notification {
    /// Creates a payload-free notification.
    pub fn new(system_time_stamp: i64, kind: NotificationKind) -> Self {
        Self {
            system_time_stamp,
            kind,
            output_frequency: None,
            display_area: None,
            errors_or_warnings: None,
        }
    }
}

impl TimeRanged for Notification {
    fn range_time(&self) -> i64 {
        self.system_time_stamp
    }
}

// =============================================================================
// Log messages and stream errors
// =============================================================================

/// Which part of the driver stack emitted a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogSource {
    /// The device SDK itself.
    Sdk,
    /// The on-device firmware.
    Firmware,
    /// The host-side tracker service.
    Service,
}

/// Severity of a device log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
}

/// One log message from the device stack.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogMessage {
    pub system_time_stamp: i64,
    pub source: LogSource,
    pub level: LogLevel,
    pub message: String,
}

/// What went wrong in a stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StreamErrorKind {
    /// The connection to the device was lost.
    ConnectionLost,
    /// Insufficient license for the requested stream.
    InsufficientLicense,
    /// The stream is not supported by the device.
    NotSupported,
    /// Samples were lost in transit.
    LostData,
    /// Unspecified internal error.
    Internal,
}

/// Where a stream error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StreamErrorSource {
    User,
    StreamPump,
    SubscriptionGaze,
    SubscriptionExternalSignal,
    SubscriptionTimeSync,
    SubscriptionEyeImage,
    SubscriptionNotification,
    SubscriptionPositioning,
}

/// An error raised by a running stream, including device-connection loss.
///
/// Stream errors are delivered through the global log sink rather than a
/// per-stream buffer: they concern the session as a whole, and a recording
/// must be able to observe them even for streams it is not buffering.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamError {
    /// Serial number of the affected device.
    pub machine_serial: String,
    pub system_time_stamp: i64,
    pub error: StreamErrorKind,
    pub source: StreamErrorSource,
    pub message: String,
}

/// An entry in the global log sink: a log message or a stream error.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogEntry {
    Message(LogMessage),
    StreamError(StreamError),
}

impl LogEntry {
    /// The host timestamp of this entry, microseconds.
    pub fn system_time_stamp(&self) -> i64 {
        match self {
            LogEntry::Message(m) => m.system_time_stamp,
            LogEntry::StreamError(e) => e.system_time_stamp,
        }
    }
}

// =============================================================================
// Tracker metadata
// =============================================================================

bitflags! {
    /// Capability flags reported by a connected tracker.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const HAS_GAZE_DATA                    = 1 << 0;
        const HAS_EYE_IMAGES                   = 1 << 1;
        const HAS_EXTERNAL_SIGNAL              = 1 << 2;
        const HAS_EYE_OPENNESS_DATA            = 1 << 3;
        const CAN_DO_SCREEN_BASED_CALIBRATION  = 1 << 4;
        const CAN_DO_MONOCULAR_CALIBRATION     = 1 << 5;
        const CAN_SET_DISPLAY_AREA             = 1 << 6;
    }
}

// Serialized as the raw bits; unknown bits from newer devices are kept.
#[cfg(feature = "serde")]
impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Capabilities::from_bits_retain(u32::deserialize(
            deserializer,
        )?))
    }
}

/// Static and configured properties of a connected tracker.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackerInfo {
    /// User-assigned device name.
    pub device_name: String,
    pub serial_number: String,
    pub model: String,
    pub firmware_version: String,
    pub runtime_version: String,
    /// Network address or USB locator of the device.
    pub address: String,
    /// Current gaze output frequency, Hz.
    pub frequency: f32,
    /// Current tracking mode identifier.
    pub tracking_mode: String,
    pub capabilities: Capabilities,
}

// =============================================================================
// Calibration data model
// =============================================================================

/// An opaque, exportable calibration blob.
///
/// Produced by a get-data action and accepted back by an apply-data action;
/// the contents are device-defined and not interpreted by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationData(pub Vec<u8>);

impl CalibrationData {
    /// Returns the raw bytes of the blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Overall outcome of a calibration computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationStatus {
    /// Calibration computed and applied for both eyes.
    Success,
    /// Calibration computed and applied for the left eye only.
    SuccessLeftEye,
    /// Calibration computed and applied for the right eye only.
    SuccessRightEye,
    /// The computation failed; the previous calibration remains active.
    Failure,
}

/// Validity of one eye's data in one calibration sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationEyeValidity {
    /// The sample was used in the computation.
    ValidAndUsed,
    /// The sample was valid but not used.
    ValidNotUsed,
    /// The sample was invalid.
    Invalid,
}

/// One gaze sample collected during calibration, for one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationSample {
    /// Where the eye actually looked, normalized display coordinates.
    pub position: Point2,
    pub validity: CalibrationEyeValidity,
}

/// Per-point detail in a computed calibration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationPoint {
    /// The stimulus position presented to the participant.
    pub position: Point2,
    pub samples_left: Vec<CalibrationSample>,
    pub samples_right: Vec<CalibrationSample>,
}

/// The result of computing and applying a calibration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationResult {
    pub status: CalibrationStatus,
    pub points: Vec<CalibrationPoint>,
}
