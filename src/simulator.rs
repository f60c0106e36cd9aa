//! A software eye tracker for tests and examples.
//!
//! [`SimulatorBackend`] implements [`TrackerBackend`] without hardware:
//! subscribing to a stream spawns a producer thread that pushes synthetic
//! records at a configurable rate, and the calibration methods behave like a
//! cooperative device (including scriptable per-point failures and abortable
//! collection, so the forced-leave path can be exercised).
//!
//! Available to unit tests and, behind the `testutils` feature, to
//! integration tests and downstream consumers that want to develop against
//! this crate without a device.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::backend::{
    DeviceError, DeviceResult, DeviceStatus, SampleSink, SubscribeOptions, TrackerBackend,
};
use crate::log_sink::LogSinkHandle;
use crate::types::{
    CalibrationData, CalibrationEyeValidity, CalibrationPoint, CalibrationResult,
    CalibrationSample, CalibrationStatus, Capabilities, DataStream, ExtSignal, Eye, EyeData,
    EyeImage, EyeImageType, EyeOpenness, Gaze, GazeOrigin, GazePoint, LogEntry, LogLevel,
    LogMessage, LogSource, Notification, NotificationKind, Point2, Point3, Positioning, PupilData,
    SignalChange, StreamError, StreamErrorKind, StreamErrorSource, TimeSync, TrackerInfo,
    UserPositionGuide,
};

/// Fixed offset between the simulated device clock and the host clock, µs.
const DEVICE_CLOCK_OFFSET: i64 = 86_400_000_000;

/// Configuration for the simulated tracker.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Gaze sample rate, Hz.
    pub gaze_rate_hz: u32,
    /// Rate of every other periodic stream, Hz.
    pub aux_rate_hz: u32,
    /// Stimulus points whose collection the simulated device rejects.
    pub failing_points: Vec<Point2>,
    /// How long one collect-data call takes.
    pub collect_duration: Duration,
    pub capabilities: Capabilities,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            gaze_rate_hz: 600,
            aux_rate_hz: 50,
            failing_points: Vec::new(),
            collect_duration: Duration::from_millis(5),
            capabilities: Capabilities::all(),
        }
    }
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A [`TrackerBackend`] backed by threads instead of hardware.
pub struct SimulatorBackend {
    config: SimulatorConfig,
    epoch: Instant,
    producers: Mutex<HashMap<DataStream, Producer>>,
    notification_sink: Mutex<Option<Arc<crate::buffer::StreamBuffer<Notification>>>>,
    log_sink: Mutex<Option<LogSinkHandle>>,
    device_name: Mutex<String>,
    frequency: Mutex<f32>,
    tracking_mode: Mutex<String>,
    in_calibration: AtomicBool,
    collected: Mutex<Vec<Point2>>,
    applied: Mutex<Option<CalibrationData>>,
    abort: AtomicBool,
}

impl SimulatorBackend {
    /// Creates a simulator with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    /// Creates a simulator with the given configuration.
    pub fn with_config(config: SimulatorConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            producers: Mutex::new(HashMap::new()),
            notification_sink: Mutex::new(None),
            log_sink: Mutex::new(None),
            device_name: Mutex::new("simulator".to_string()),
            frequency: Mutex::new(600.0),
            tracking_mode: Mutex::new("default".to_string()),
            in_calibration: AtomicBool::new(false),
            collected: Mutex::new(Vec::new()),
            applied: Mutex::new(None),
            abort: AtomicBool::new(false),
        }
    }

    fn now(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// The last calibration blob applied to the simulated device.
    pub fn applied_calibration(&self) -> Option<CalibrationData> {
        self.applied.lock().clone()
    }

    /// Simulates losing the device connection: a stream error goes to the
    /// log sink and a notification to the notification stream, the way a
    /// real driver reports it. Producers keep running; a real device would
    /// reconnect.
    pub fn simulate_connection_loss(&self) {
        if let Some(sink) = self.log_sink.lock().as_ref() {
            sink.append(LogEntry::StreamError(StreamError {
                machine_serial: "SIM-0001".to_string(),
                system_time_stamp: self.now(),
                error: StreamErrorKind::ConnectionLost,
                source: StreamErrorSource::StreamPump,
                message: "connection to the device was lost".to_string(),
            }));
        }
        self.emit_notification(NotificationKind::ConnectionLost);
    }

    fn emit_notification(&self, kind: NotificationKind) {
        if let Some(sink) = self.notification_sink.lock().as_ref() {
            sink.push(Notification::new(self.now(), kind));
        }
    }

    fn emit_log(&self, level: LogLevel, message: &str) {
        if let Some(sink) = self.log_sink.lock().as_ref() {
            sink.append(LogEntry::Message(LogMessage {
                system_time_stamp: self.now(),
                source: LogSource::Sdk,
                level,
                message: message.to_string(),
            }));
        }
    }

    fn spawn_producer<T, F>(&self, stream: DataStream, rate_hz: u32, sink: Arc<crate::buffer::StreamBuffer<T>>, mut make: F)
    where
        T: Send + 'static,
        F: FnMut(i64) -> T + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_loop = Arc::clone(&stop);
        let period = Duration::from_micros(1_000_000 / rate_hz.max(1) as u64);
        let origin = self.now();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let mut produced: u64 = 0;
            while !stop_for_loop.load(Ordering::Relaxed) {
                // Pace by absolute schedule so the sample clock doesn't
                // drift with sleep jitter.
                let due = period * (produced as u32 + 1);
                let elapsed = started.elapsed();
                if due > elapsed {
                    thread::sleep(due - elapsed);
                }
                let ts = origin + started.elapsed().as_micros() as i64;
                sink.push(make(ts));
                produced += 1;
            }
        });
        self.producers.lock().insert(stream, Producer { stop, handle });
        log::debug!("simulator: producer started for {} stream", stream);
    }

    fn stop_producer(&self, stream: DataStream) {
        if let Some(producer) = self.producers.lock().remove(&stream) {
            producer.stop.store(true, Ordering::Relaxed);
            let _ = producer.handle.join();
        }
    }
}

impl Default for SimulatorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatorBackend {
    fn drop(&mut self) {
        let mut producers = self.producers.lock();
        for (_, producer) in producers.drain() {
            producer.stop.store(true, Ordering::Relaxed);
            let _ = producer.handle.join();
        }
    }
}

fn eye_data(looking_at: Point2, include_openness: bool) -> EyeData {
    EyeData {
        gaze_point: GazePoint {
            position_on_display_area: looking_at,
            position_in_user_coordinates: Point3::new(
                (looking_at.x - 0.5) * 510.0,
                (0.5 - looking_at.y) * 290.0,
                0.0,
            ),
            valid: true,
            available: true,
        },
        pupil: PupilData {
            diameter: 3.2,
            valid: true,
            available: true,
        },
        gaze_origin: GazeOrigin {
            position_in_user_coordinates: Point3::new(31.0, 0.0, 620.0),
            position_in_track_box_coordinates: Point3::new(0.55, 0.5, 0.45),
            valid: true,
            available: true,
        },
        eye_openness: EyeOpenness {
            diameter: if include_openness { 10.5 } else { 0.0 },
            valid: include_openness,
            available: include_openness,
        },
    }
}

impl TrackerBackend for SimulatorBackend {
    fn info(&self) -> TrackerInfo {
        TrackerInfo {
            device_name: self.device_name.lock().clone(),
            serial_number: "SIM-0001".to_string(),
            model: "Simulated Tracker".to_string(),
            firmware_version: "1.0.0".to_string(),
            runtime_version: "1.0.0".to_string(),
            address: "sim://local".to_string(),
            frequency: *self.frequency.lock(),
            tracking_mode: self.tracking_mode.lock().clone(),
            capabilities: self.config.capabilities,
        }
    }

    fn set_device_name(&self, name: &str) -> DeviceResult<()> {
        *self.device_name.lock() = name.to_string();
        Ok(())
    }

    fn set_frequency(&self, frequency: f32) -> DeviceResult<()> {
        if frequency <= 0.0 {
            return Err(DeviceError::invalid_operation("frequency must be positive"));
        }
        *self.frequency.lock() = frequency;
        self.emit_notification(NotificationKind::GazeOutputFrequencyChanged);
        Ok(())
    }

    fn set_tracking_mode(&self, mode: &str) -> DeviceResult<()> {
        *self.tracking_mode.lock() = mode.to_string();
        self.emit_notification(NotificationKind::EyeTrackingModeChanged);
        Ok(())
    }

    fn system_time_stamp(&self) -> i64 {
        self.now()
    }

    fn subscribe(&self, sink: SampleSink, options: &SubscribeOptions) -> DeviceResult<()> {
        let stream = sink.stream();
        // Re-subscription replaces the producer (new options take effect).
        self.stop_producer(stream);

        match sink {
            SampleSink::Gaze(buffer) => {
                let include_openness = options.include_eye_openness;
                self.spawn_producer(stream, self.config.gaze_rate_hz, buffer, move |ts| Gaze {
                    device_time_stamp: ts + DEVICE_CLOCK_OFFSET,
                    system_time_stamp: ts,
                    left_eye: eye_data(Point2::new(0.48, 0.52), include_openness),
                    right_eye: eye_data(Point2::new(0.52, 0.52), include_openness),
                });
            }
            SampleSink::EyeImage(buffer) => {
                let as_gif = options.eye_images_as_gif;
                self.spawn_producer(stream, self.config.aux_rate_hz, buffer, move |ts| EyeImage {
                    device_time_stamp: ts + DEVICE_CLOCK_OFFSET,
                    system_time_stamp: ts,
                    region_id: 0,
                    region_top: 80,
                    region_left: 120,
                    bits_per_pixel: 8,
                    padding_per_pixel: 0,
                    width: 16,
                    height: 16,
                    kind: EyeImageType::Cropped,
                    camera_id: (ts as u32) & 1,
                    is_gif: as_gif,
                    image: vec![0x80; 16 * 16],
                });
            }
            SampleSink::ExternalSignal(buffer) => {
                self.spawn_producer(stream, self.config.aux_rate_hz, buffer, move |ts| ExtSignal {
                    device_time_stamp: ts + DEVICE_CLOCK_OFFSET,
                    system_time_stamp: ts,
                    value: ts & 0xFF,
                    change_type: SignalChange::ValueChanged,
                });
            }
            SampleSink::TimeSync(buffer) => {
                self.spawn_producer(stream, self.config.aux_rate_hz, buffer, move |ts| TimeSync {
                    system_request_time_stamp: ts,
                    device_time_stamp: ts + DEVICE_CLOCK_OFFSET + 150,
                    system_response_time_stamp: ts + 300,
                });
            }
            SampleSink::Positioning(buffer) => {
                self.spawn_producer(stream, self.config.aux_rate_hz, buffer, move |_ts| {
                    Positioning {
                        left: UserPositionGuide {
                            user_position: Point3::new(0.45, 0.5, 0.5),
                            valid: true,
                        },
                        right: UserPositionGuide {
                            user_position: Point3::new(0.55, 0.5, 0.5),
                            valid: true,
                        },
                    }
                });
            }
            SampleSink::Notification(buffer) => {
                // Notifications are event-driven, not periodic.
                *self.notification_sink.lock() = Some(buffer);
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, stream: DataStream) -> DeviceResult<()> {
        if stream == DataStream::Notification {
            *self.notification_sink.lock() = None;
        } else {
            self.stop_producer(stream);
        }
        Ok(())
    }

    fn subscribe_log(&self, sink: LogSinkHandle) {
        *self.log_sink.lock() = Some(sink);
    }

    fn unsubscribe_log(&self) {
        *self.log_sink.lock() = None;
    }

    fn calibration_enter(&self, monocular: bool) -> DeviceResult<()> {
        if monocular
            && !self
                .config
                .capabilities
                .contains(Capabilities::CAN_DO_MONOCULAR_CALIBRATION)
        {
            return Err(DeviceError::invalid_operation(
                "device cannot calibrate monocularly",
            ));
        }
        if self.in_calibration.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::invalid_operation("already in calibration mode"));
        }
        self.collected.lock().clear();
        self.abort.store(false, Ordering::SeqCst);
        self.emit_notification(NotificationKind::CalibrationModeEntered);
        self.emit_log(LogLevel::Information, "calibration mode entered");
        Ok(())
    }

    fn calibration_exit(&self) -> DeviceResult<()> {
        self.in_calibration.store(false, Ordering::SeqCst);
        self.emit_notification(NotificationKind::CalibrationModeLeft);
        self.emit_log(LogLevel::Information, "calibration mode left");
        Ok(())
    }

    fn calibration_collect(&self, point: Point2, _eye: Option<Eye>) -> DeviceResult<()> {
        // Fixation takes time; poll the abort flag while "looking".
        let deadline = Instant::now() + self.config.collect_duration;
        while Instant::now() < deadline {
            if self.abort.swap(false, Ordering::SeqCst) {
                return Err(DeviceError::new(
                    DeviceStatus::OperationAborted,
                    "collection aborted",
                ));
            }
            thread::sleep(Duration::from_micros(500));
        }
        if self.config.failing_points.contains(&point) {
            return Err(DeviceError::new(
                DeviceStatus::CalibrationFailure,
                format!("no usable gaze data at ({}, {})", point.x, point.y),
            ));
        }
        self.collected.lock().push(point);
        Ok(())
    }

    fn calibration_discard(&self, point: Point2, _eye: Option<Eye>) -> DeviceResult<()> {
        let mut collected = self.collected.lock();
        match collected.iter().rposition(|p| *p == point) {
            Some(idx) => {
                collected.remove(idx);
                Ok(())
            }
            None => Err(DeviceError::invalid_operation(format!(
                "no data collected at ({}, {})",
                point.x, point.y
            ))),
        }
    }

    fn calibration_compute_apply(&self) -> DeviceResult<CalibrationResult> {
        let collected = self.collected.lock();
        if collected.is_empty() {
            return Ok(CalibrationResult {
                status: CalibrationStatus::Failure,
                points: Vec::new(),
            });
        }
        let points = collected
            .iter()
            .map(|&position| {
                let sample = CalibrationSample {
                    position,
                    validity: CalibrationEyeValidity::ValidAndUsed,
                };
                CalibrationPoint {
                    position,
                    samples_left: vec![sample],
                    samples_right: vec![sample],
                }
            })
            .collect();
        Ok(CalibrationResult {
            status: CalibrationStatus::Success,
            points,
        })
    }

    fn calibration_get_data(&self) -> DeviceResult<CalibrationData> {
        let collected = self.collected.lock();
        // Simple device-defined encoding: point count, then coordinates.
        let mut bytes = Vec::with_capacity(1 + collected.len() * 8);
        bytes.push(collected.len() as u8);
        for point in collected.iter() {
            bytes.extend_from_slice(&point.x.to_le_bytes());
            bytes.extend_from_slice(&point.y.to_le_bytes());
        }
        Ok(CalibrationData(bytes))
    }

    fn calibration_apply_data(&self, data: &CalibrationData) -> DeviceResult<()> {
        if data.is_empty() {
            return Err(DeviceError::invalid_operation("empty calibration blob"));
        }
        *self.applied.lock() = Some(data.clone());
        self.emit_notification(NotificationKind::CalibrationChanged);
        Ok(())
    }

    fn calibration_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}
