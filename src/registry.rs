//! Buffer registry: one stream buffer per stream kind, plus typed dispatch.
//!
//! The registry owns the six per-stream buffers of a tracker session and
//! guards their lifecycle: `start` activates a buffer and subscribes the
//! backend to the stream with that buffer as the sink, `stop` unsubscribes
//! and deactivates. Stream kinds are independent: starting gaze never
//! touches the eye-image stream.
//!
//! Consumption is typed: [`StreamData`] ties each record type to its stream
//! kind and its buffer, so `consume_n::<Gaze>(..)` compiles down to a direct
//! buffer access with no runtime dispatch. Kind-keyed operations (`clear`,
//! `stop`, ...) dispatch by `match`; that is where the positioning stream's
//! time-range rejection lives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::{SampleSink, SubscribeOptions, TrackerBackend};
use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};
use crate::types::{
    BufferSide, DataStream, ExtSignal, EyeImage, Gaze, Notification, Positioning, TimeRanged,
    TimeSync,
};

// Default preallocation per stream, in records. Sized for the highest-rate
// devices (~1200 Hz gaze): the gaze default holds roughly seven minutes.
const DEFAULT_GAZE_BUF_SIZE: usize = 1 << 19;
const DEFAULT_EYE_IMAGE_BUF_SIZE: usize = 1 << 14;
const DEFAULT_EXT_SIGNAL_BUF_SIZE: usize = 1 << 14;
const DEFAULT_TIME_SYNC_BUF_SIZE: usize = 1 << 14;
const DEFAULT_POSITIONING_BUF_SIZE: usize = 1 << 11;
const DEFAULT_NOTIFICATION_BUF_SIZE: usize = 1 << 6;

/// Stream-specific options for [`BufferRegistry::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamOptions {
    /// For the eye-image stream: deliver images GIF-encoded.
    pub eye_images_as_gif: bool,
}

impl StreamOptions {
    /// Options requesting GIF-encoded eye images.
    pub fn as_gif() -> Self {
        Self {
            eye_images_as_gif: true,
        }
    }
}

/// A record type belonging to exactly one data stream.
///
/// Implemented by the six sample record types; gives the typed consume/peek
/// operations their buffer without runtime dispatch.
pub trait StreamData: Clone + Send + Sized + 'static {
    /// The stream this record type belongs to.
    const STREAM: DataStream;

    /// The registry's buffer for this record type.
    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>>;
}

impl StreamData for Gaze {
    const STREAM: DataStream = DataStream::Gaze;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.gaze
    }
}

impl StreamData for EyeImage {
    const STREAM: DataStream = DataStream::EyeImage;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.eye_image
    }
}

impl StreamData for ExtSignal {
    const STREAM: DataStream = DataStream::ExternalSignal;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.ext_signal
    }
}

impl StreamData for TimeSync {
    const STREAM: DataStream = DataStream::TimeSync;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.time_sync
    }
}

impl StreamData for Positioning {
    const STREAM: DataStream = DataStream::Positioning;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.positioning
    }
}

impl StreamData for Notification {
    const STREAM: DataStream = DataStream::Notification;

    fn buffer(registry: &BufferRegistry) -> &Arc<StreamBuffer<Self>> {
        &registry.notification
    }
}

/// Owns the per-stream buffers of one tracker session.
pub struct BufferRegistry {
    backend: Arc<dyn TrackerBackend>,
    gaze: Arc<StreamBuffer<Gaze>>,
    eye_image: Arc<StreamBuffer<EyeImage>>,
    ext_signal: Arc<StreamBuffer<ExtSignal>>,
    time_sync: Arc<StreamBuffer<TimeSync>>,
    positioning: Arc<StreamBuffer<Positioning>>,
    notification: Arc<StreamBuffer<Notification>>,
    include_eye_openness: AtomicBool,
}

impl BufferRegistry {
    /// Creates the registry for one backend. All buffers exist from the
    /// start but stay inactive until their stream is started.
    pub fn new(backend: Arc<dyn TrackerBackend>) -> Self {
        Self {
            backend,
            gaze: Arc::new(StreamBuffer::new()),
            eye_image: Arc::new(StreamBuffer::new()),
            ext_signal: Arc::new(StreamBuffer::new()),
            time_sync: Arc::new(StreamBuffer::new()),
            positioning: Arc::new(StreamBuffer::new()),
            notification: Arc::new(StreamBuffer::new()),
            include_eye_openness: AtomicBool::new(false),
        }
    }

    /// Returns whether the device provides this stream at all, independent
    /// of whether buffering is active.
    pub fn has_stream(&self, stream: DataStream) -> bool {
        match stream.required_capability() {
            Some(cap) => self.backend.info().capabilities.contains(cap),
            None => true,
        }
    }

    /// Starts buffering a stream: activates its buffer and subscribes the
    /// backend with the buffer as the sink.
    ///
    /// Starting an already-recording stream is a no-op success. Fails before
    /// touching any buffer if the device lacks the stream.
    pub fn start(
        &self,
        stream: DataStream,
        buf_size_hint: Option<usize>,
        options: StreamOptions,
    ) -> Result<bool> {
        if !self.has_stream(stream) {
            return Err(Error::StreamNotSupported(stream));
        }
        if self.is_recording(stream) {
            return Ok(true);
        }

        let hint = buf_size_hint.unwrap_or(default_buf_size(stream));
        let (started, sink) = match stream {
            DataStream::Gaze => (self.gaze.start(Some(hint)), SampleSink::Gaze(Arc::clone(&self.gaze))),
            DataStream::EyeImage => (
                self.eye_image.start(Some(hint)),
                SampleSink::EyeImage(Arc::clone(&self.eye_image)),
            ),
            DataStream::ExternalSignal => (
                self.ext_signal.start(Some(hint)),
                SampleSink::ExternalSignal(Arc::clone(&self.ext_signal)),
            ),
            DataStream::TimeSync => (
                self.time_sync.start(Some(hint)),
                SampleSink::TimeSync(Arc::clone(&self.time_sync)),
            ),
            DataStream::Positioning => (
                self.positioning.start(Some(hint)),
                SampleSink::Positioning(Arc::clone(&self.positioning)),
            ),
            DataStream::Notification => (
                self.notification.start(Some(hint)),
                SampleSink::Notification(Arc::clone(&self.notification)),
            ),
        };
        if !started {
            return Err(Error::BufferAllocation {
                stream,
                requested: hint,
            });
        }

        if let Err(e) = self.backend.subscribe(sink, &self.subscribe_options(options)) {
            // Subscription failed; leave the buffer as it was found.
            self.stop_buffer(stream, false);
            return Err(e.into());
        }
        log::debug!("started {} stream (buffer hint: {})", stream, hint);
        Ok(true)
    }

    /// Returns whether a stream is currently being buffered.
    pub fn is_recording(&self, stream: DataStream) -> bool {
        match stream {
            DataStream::Gaze => self.gaze.is_active(),
            DataStream::EyeImage => self.eye_image.is_active(),
            DataStream::ExternalSignal => self.ext_signal.is_active(),
            DataStream::TimeSync => self.time_sync.is_active(),
            DataStream::Positioning => self.positioning.is_active(),
            DataStream::Notification => self.notification.is_active(),
        }
    }

    /// Stops buffering a stream, optionally clearing its buffer.
    ///
    /// Returns false if the stream was not recording. Buffered records are
    /// kept (unless `clear`) so they remain consumable after the stop.
    pub fn stop(&self, stream: DataStream, clear: Option<bool>) -> Result<bool> {
        if !self.is_recording(stream) {
            return Ok(false);
        }
        self.backend.unsubscribe(stream)?;
        let was_recording = self.stop_buffer(stream, clear.unwrap_or(false));
        log::debug!("stopped {} stream", stream);
        Ok(was_recording)
    }

    /// Removes and returns up to `n` records of a stream (see
    /// [`StreamBuffer::consume_n`]).
    pub fn consume_n<T: StreamData>(
        &self,
        n: Option<usize>,
        side: BufferSide,
    ) -> Vec<T> {
        T::buffer(self).consume_n(n, side)
    }

    /// Non-destructive twin of [`consume_n`](Self::consume_n).
    pub fn peek_n<T: StreamData>(
        &self,
        n: Option<usize>,
        side: BufferSide,
    ) -> Vec<T> {
        T::buffer(self).peek_n(n, side)
    }

    /// Removes and returns a stream's records inside a time range (see
    /// [`StreamBuffer::consume_time_range`]).
    pub fn consume_time_range<T: StreamData + TimeRanged>(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Vec<T> {
        T::buffer(self).consume_time_range(start, end)
    }

    /// Non-destructive twin of
    /// [`consume_time_range`](Self::consume_time_range).
    pub fn peek_time_range<T: StreamData + TimeRanged>(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Vec<T> {
        T::buffer(self).peek_time_range(start, end)
    }

    /// Discards all buffered records of a stream.
    pub fn clear(&self, stream: DataStream) {
        match stream {
            DataStream::Gaze => self.gaze.clear(),
            DataStream::EyeImage => self.eye_image.clear(),
            DataStream::ExternalSignal => self.ext_signal.clear(),
            DataStream::TimeSync => self.time_sync.clear(),
            DataStream::Positioning => self.positioning.clear(),
            DataStream::Notification => self.notification.clear(),
        }
    }

    /// Discards a stream's records inside a time range.
    ///
    /// Rejected for the positioning stream, whose records carry no
    /// timestamp to range on.
    pub fn clear_time_range(
        &self,
        stream: DataStream,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<()> {
        match stream {
            DataStream::Gaze => self.gaze.clear_time_range(start, end),
            DataStream::EyeImage => self.eye_image.clear_time_range(start, end),
            DataStream::ExternalSignal => self.ext_signal.clear_time_range(start, end),
            DataStream::TimeSync => self.time_sync.clear_time_range(start, end),
            DataStream::Positioning => {
                return Err(Error::unsupported(stream, "clearTimeRange"));
            }
            DataStream::Notification => self.notification.clear_time_range(start, end),
        }
        Ok(())
    }

    /// Enables or disables eye-openness delivery in gaze samples.
    ///
    /// Takes effect for gaze streams started afterwards; a live gaze stream
    /// is re-subscribed so the change applies immediately.
    pub fn set_include_eye_openness(&self, include: bool) -> Result<()> {
        let changed = self.include_eye_openness.swap(include, Ordering::AcqRel) != include;
        if changed && self.is_recording(DataStream::Gaze) {
            self.backend.unsubscribe(DataStream::Gaze)?;
            self.backend.subscribe(
                SampleSink::Gaze(Arc::clone(&self.gaze)),
                &self.subscribe_options(StreamOptions::default()),
            )?;
        }
        Ok(())
    }

    /// Returns whether gaze samples are requested with eye-openness data.
    pub fn include_eye_openness(&self) -> bool {
        self.include_eye_openness.load(Ordering::Acquire)
    }

    fn subscribe_options(&self, options: StreamOptions) -> SubscribeOptions {
        SubscribeOptions {
            include_eye_openness: self.include_eye_openness.load(Ordering::Acquire),
            eye_images_as_gif: options.eye_images_as_gif,
        }
    }

    fn stop_buffer(&self, stream: DataStream, clear: bool) -> bool {
        match stream {
            DataStream::Gaze => self.gaze.stop(clear),
            DataStream::EyeImage => self.eye_image.stop(clear),
            DataStream::ExternalSignal => self.ext_signal.stop(clear),
            DataStream::TimeSync => self.time_sync.stop(clear),
            DataStream::Positioning => self.positioning.stop(clear),
            DataStream::Notification => self.notification.stop(clear),
        }
    }
}

/// Default preallocation for a stream's buffer.
fn default_buf_size(stream: DataStream) -> usize {
    match stream {
        DataStream::Gaze => DEFAULT_GAZE_BUF_SIZE,
        DataStream::EyeImage => DEFAULT_EYE_IMAGE_BUF_SIZE,
        DataStream::ExternalSignal => DEFAULT_EXT_SIGNAL_BUF_SIZE,
        DataStream::TimeSync => DEFAULT_TIME_SYNC_BUF_SIZE,
        DataStream::Positioning => DEFAULT_POSITIONING_BUF_SIZE,
        DataStream::Notification => DEFAULT_NOTIFICATION_BUF_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceResult, DeviceStatus, DeviceError};
    use crate::log_sink::LogSinkHandle;
    use crate::types::{
        BufferSide, CalibrationData, CalibrationResult, Capabilities, Eye, Point2, TrackerInfo,
    };
    use parking_lot::Mutex;

    /// Backend stub that records subscriptions instead of producing data.
    struct RecordingBackend {
        capabilities: Capabilities,
        subscriptions: Mutex<Vec<(DataStream, SubscribeOptions)>>,
        unsubscriptions: Mutex<Vec<DataStream>>,
    }

    impl RecordingBackend {
        fn new(capabilities: Capabilities) -> Self {
            Self {
                capabilities,
                subscriptions: Mutex::new(Vec::new()),
                unsubscriptions: Mutex::new(Vec::new()),
            }
        }
    }

    impl TrackerBackend for RecordingBackend {
        fn info(&self) -> TrackerInfo {
            TrackerInfo {
                device_name: "unit".to_string(),
                serial_number: "RB-1".to_string(),
                model: "Recording".to_string(),
                firmware_version: "0.0".to_string(),
                runtime_version: "0.0".to_string(),
                address: "test://unit".to_string(),
                frequency: 600.0,
                tracking_mode: "default".to_string(),
                capabilities: self.capabilities,
            }
        }

        fn set_device_name(&self, _name: &str) -> DeviceResult<()> {
            Ok(())
        }

        fn set_frequency(&self, _frequency: f32) -> DeviceResult<()> {
            Ok(())
        }

        fn set_tracking_mode(&self, _mode: &str) -> DeviceResult<()> {
            Ok(())
        }

        fn system_time_stamp(&self) -> i64 {
            0
        }

        fn subscribe(&self, sink: SampleSink, options: &SubscribeOptions) -> DeviceResult<()> {
            self.subscriptions.lock().push((sink.stream(), *options));
            Ok(())
        }

        fn unsubscribe(&self, stream: DataStream) -> DeviceResult<()> {
            self.unsubscriptions.lock().push(stream);
            Ok(())
        }

        fn subscribe_log(&self, _sink: LogSinkHandle) {}

        fn unsubscribe_log(&self) {}

        fn calibration_enter(&self, _monocular: bool) -> DeviceResult<()> {
            Err(DeviceError::invalid_operation("no calibration in this stub"))
        }

        fn calibration_exit(&self) -> DeviceResult<()> {
            Ok(())
        }

        fn calibration_collect(&self, _point: Point2, _eye: Option<Eye>) -> DeviceResult<()> {
            Ok(())
        }

        fn calibration_discard(&self, _point: Point2, _eye: Option<Eye>) -> DeviceResult<()> {
            Ok(())
        }

        fn calibration_compute_apply(&self) -> DeviceResult<CalibrationResult> {
            Err(DeviceError::new(DeviceStatus::InvalidOperation, "stub"))
        }

        fn calibration_get_data(&self) -> DeviceResult<CalibrationData> {
            Err(DeviceError::new(DeviceStatus::InvalidOperation, "stub"))
        }

        fn calibration_apply_data(&self, _data: &CalibrationData) -> DeviceResult<()> {
            Ok(())
        }

        fn calibration_abort(&self) {}
    }

    fn registry() -> (Arc<RecordingBackend>, BufferRegistry) {
        let backend = Arc::new(RecordingBackend::new(Capabilities::all()));
        let registry = BufferRegistry::new(Arc::clone(&backend) as Arc<dyn TrackerBackend>);
        (backend, registry)
    }

    fn gaze_at(device: i64) -> Gaze {
        Gaze {
            device_time_stamp: device,
            system_time_stamp: device,
            ..Gaze::default()
        }
    }

    #[test]
    fn test_missing_capability_is_rejected_before_buffering() {
        let backend = Arc::new(RecordingBackend::new(Capabilities::HAS_GAZE_DATA));
        let registry = BufferRegistry::new(Arc::clone(&backend) as Arc<dyn TrackerBackend>);

        assert!(registry.has_stream(DataStream::Gaze));
        assert!(!registry.has_stream(DataStream::EyeImage));
        // Capability-free streams always exist.
        assert!(registry.has_stream(DataStream::TimeSync));

        let err = registry
            .start(DataStream::EyeImage, None, StreamOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::StreamNotSupported(DataStream::EyeImage)));
        assert!(backend.subscriptions.lock().is_empty());
        assert!(!registry.is_recording(DataStream::EyeImage));
    }

    #[test]
    fn test_start_is_idempotent_and_keeps_data() {
        let (backend, registry) = registry();

        assert!(registry
            .start(DataStream::Gaze, Some(1000), StreamOptions::default())
            .unwrap());
        Gaze::buffer(&registry).push(gaze_at(100));

        assert!(registry
            .start(DataStream::Gaze, Some(1000), StreamOptions::default())
            .unwrap());
        assert_eq!(registry.peek_n::<Gaze>(None, BufferSide::Start).len(), 1);
        // Only the first start subscribed.
        assert_eq!(backend.subscriptions.lock().len(), 1);
    }

    #[test]
    fn test_stop_reports_not_active_and_unsubscribes() {
        let (backend, registry) = registry();

        assert!(!registry.stop(DataStream::Gaze, None).unwrap());

        registry
            .start(DataStream::Gaze, None, StreamOptions::default())
            .unwrap();
        Gaze::buffer(&registry).push(gaze_at(1));

        assert!(registry.stop(DataStream::Gaze, None).unwrap());
        assert_eq!(backend.unsubscriptions.lock().as_slice(), &[DataStream::Gaze]);
        // Data survives a non-clearing stop.
        assert_eq!(registry.consume_n::<Gaze>(None, BufferSide::Start).len(), 1);
    }

    #[test]
    fn test_streams_are_independent() {
        let (_backend, registry) = registry();
        registry
            .start(DataStream::Gaze, None, StreamOptions::default())
            .unwrap();
        registry
            .start(DataStream::TimeSync, None, StreamOptions::default())
            .unwrap();

        registry.stop(DataStream::Gaze, None).unwrap();
        assert!(!registry.is_recording(DataStream::Gaze));
        assert!(registry.is_recording(DataStream::TimeSync));
    }

    #[test]
    fn test_clear_time_range_rejects_positioning() {
        let (_backend, registry) = registry();
        let err = registry
            .clear_time_range(DataStream::Positioning, Some(0), Some(100))
            .unwrap_err();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("positioning"));

        registry
            .clear_time_range(DataStream::Gaze, Some(0), Some(100))
            .unwrap();
    }

    #[test]
    fn test_gif_option_reaches_subscription() {
        let (backend, registry) = registry();
        registry
            .start(DataStream::EyeImage, None, StreamOptions::as_gif())
            .unwrap();

        let subs = backend.subscriptions.lock();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].0, DataStream::EyeImage);
        assert!(subs[0].1.eye_images_as_gif);
    }

    #[test]
    fn test_eye_openness_resubscribes_live_gaze() {
        let (backend, registry) = registry();

        // No gaze running: just records the preference.
        registry.set_include_eye_openness(true).unwrap();
        assert!(backend.subscriptions.lock().is_empty());

        registry
            .start(DataStream::Gaze, None, StreamOptions::default())
            .unwrap();
        assert!(backend.subscriptions.lock()[0].1.include_eye_openness);

        // Flipping while live re-subscribes with the new option.
        registry.set_include_eye_openness(false).unwrap();
        let subs = backend.subscriptions.lock();
        assert_eq!(subs.len(), 2);
        assert!(!subs[1].1.include_eye_openness);
        assert_eq!(
            backend.unsubscriptions.lock().as_slice(),
            &[DataStream::Gaze]
        );
    }
}
