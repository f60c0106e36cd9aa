//! Calibration engine: a serialized action queue over a worker thread.
//!
//! Calibration manipulates shared device state, so it is inherently serial:
//! the engine admits one action at a time, executes it on a dedicated worker
//! thread, and reports outcomes as [`CalibrationWorkResult`] values the
//! caller retrieves separately. Single-flight is enforced by the state
//! machine itself (a submission is only accepted while the engine is
//! [`CalibrationState::AwaitingCalPoint`]), not by incidental locking.
//!
//! Device-side failures (a point that would not collect, a computation the
//! device rejected) are data: they arrive in the work result's `status`, and
//! the caller decides whether to retry. Errors returned by the engine's own
//! methods are caller errors (wrong state, not in calibration mode).

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::backend::{DeviceError, DeviceStatus, TrackerBackend};
use crate::error::{Error, Result};
use crate::types::{CalibrationData, CalibrationResult, Eye, Point2};

// =============================================================================
// States and actions
// =============================================================================

/// The calibration state machine.
///
/// Exactly one state is active at any time. The busy states (collecting
/// through applying) are entered when the corresponding action is admitted
/// and left when the worker finishes executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationState {
    /// Calibration mode has never been entered.
    NotYetEntered,
    /// In calibration mode, ready for the next action.
    AwaitingCalPoint,
    /// Collecting data for a stimulus point.
    CollectingData,
    /// Discarding data for a stimulus point.
    DiscardingData,
    /// Computing and applying a calibration.
    Computing,
    /// Exporting the active calibration.
    GettingCalibrationData,
    /// Applying an imported calibration blob.
    ApplyingCalibrationData,
    /// Calibration mode was left; terminal until re-entered.
    Left,
}

impl CalibrationState {
    /// Returns the canonical name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationState::NotYetEntered => "NotYetEntered",
            CalibrationState::AwaitingCalPoint => "AwaitingCalPoint",
            CalibrationState::CollectingData => "CollectingData",
            CalibrationState::DiscardingData => "DiscardingData",
            CalibrationState::Computing => "Computing",
            CalibrationState::GettingCalibrationData => "GettingCalibrationData",
            CalibrationState::ApplyingCalibrationData => "ApplyingCalibrationData",
            CalibrationState::Left => "Left",
        }
    }

    /// Returns whether this state counts as being in calibration mode.
    pub fn is_in_calibration_mode(&self) -> bool {
        !matches!(self, CalibrationState::NotYetEntered | CalibrationState::Left)
    }
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The actions the calibration worker can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationAction {
    /// Placeholder action; executes nothing.
    Nothing,
    /// Enter calibration mode.
    Enter,
    /// Collect data for a stimulus point.
    CollectData,
    /// Discard data for a stimulus point.
    DiscardData,
    /// Compute and apply a calibration.
    Compute,
    /// Export the active calibration.
    GetCalibrationData,
    /// Apply an imported calibration blob.
    ApplyCalibrationData,
    /// Leave calibration mode and stop the worker.
    Exit,
}

// =============================================================================
// Work items and results
// =============================================================================

/// One request for the calibration worker.
///
/// Which optional fields are populated follows from the action: collect and
/// discard carry coordinates (and possibly an eye selector), apply carries a
/// calibration blob, everything else carries the action alone. Use the
/// constructors; they populate exactly the right fields.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationWorkItem {
    pub action: CalibrationAction,
    pub coordinates: Option<Point2>,
    pub eye: Option<Eye>,
    pub calibration_data: Option<CalibrationData>,
}

impl CalibrationWorkItem {
    fn bare(action: CalibrationAction) -> Self {
        Self {
            action,
            coordinates: None,
            eye: None,
            calibration_data: None,
        }
    }

    /// An enter-calibration-mode request.
    pub fn enter() -> Self {
        Self::bare(CalibrationAction::Enter)
    }

    /// A collect-data request for a stimulus point.
    pub fn collect(point: Point2, eye: Option<Eye>) -> Self {
        Self {
            coordinates: Some(point),
            eye,
            ..Self::bare(CalibrationAction::CollectData)
        }
    }

    /// A discard-data request for a stimulus point.
    pub fn discard(point: Point2, eye: Option<Eye>) -> Self {
        Self {
            coordinates: Some(point),
            eye,
            ..Self::bare(CalibrationAction::DiscardData)
        }
    }

    /// A compute-and-apply request.
    pub fn compute() -> Self {
        Self::bare(CalibrationAction::Compute)
    }

    /// An export-calibration request.
    pub fn get_data() -> Self {
        Self::bare(CalibrationAction::GetCalibrationData)
    }

    /// An apply-calibration request.
    pub fn apply_data(data: CalibrationData) -> Self {
        Self {
            calibration_data: Some(data),
            ..Self::bare(CalibrationAction::ApplyCalibrationData)
        }
    }

    /// A leave-calibration-mode request.
    pub fn exit() -> Self {
        Self::bare(CalibrationAction::Exit)
    }
}

/// Payload of a completed calibration action.
///
/// The shape is fixed by the work item that produced the result: compute
/// yields a [`CalibrationResult`], get-data yields a [`CalibrationData`]
/// blob, every other action yields nothing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationOutcome {
    /// The action produces no payload.
    None,
    /// A computed (and applied) calibration.
    Computed(CalibrationResult),
    /// An exported calibration blob.
    Exported(CalibrationData),
}

/// The outcome of one calibration work item.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationWorkResult {
    /// The request this result answers.
    pub work_item: CalibrationWorkItem,
    /// Device status the action completed with.
    pub status: DeviceStatus,
    /// Human-readable form of `status`, including any driver message.
    pub status_string: String,
    outcome: CalibrationOutcome,
}

impl CalibrationWorkResult {
    fn succeeded(work_item: CalibrationWorkItem, outcome: CalibrationOutcome) -> Self {
        Self {
            work_item,
            status: DeviceStatus::Ok,
            status_string: DeviceStatus::Ok.as_str().to_string(),
            outcome,
        }
    }

    fn failed(work_item: CalibrationWorkItem, error: DeviceError) -> Self {
        Self {
            work_item,
            status_string: error.to_string(),
            status: error.status,
            outcome: CalibrationOutcome::None,
        }
    }

    /// The payload of this result.
    pub fn outcome(&self) -> &CalibrationOutcome {
        &self.outcome
    }

    /// The computed calibration, if this result answers a compute action.
    pub fn calibration_result(&self) -> Option<&CalibrationResult> {
        match &self.outcome {
            CalibrationOutcome::Computed(result) => Some(result),
            _ => None,
        }
    }

    /// The exported blob, if this result answers a get-data action.
    pub fn calibration_data(&self) -> Option<&CalibrationData> {
        match &self.outcome {
            CalibrationOutcome::Exported(data) => Some(data),
            _ => None,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

struct Worker {
    command_tx: Sender<CalibrationWorkItem>,
    handle: JoinHandle<()>,
}

/// Serialized calibration control for one tracker session.
///
/// Created in [`CalibrationState::NotYetEntered`];
/// [`enter_calibration_mode`](Self::enter_calibration_mode) spawns the worker
/// thread and every subsequent action executes on it, one at a time. Results
/// are retrieved with [`retrieve_result`](Self::retrieve_result).
pub struct CalibrationEngine {
    backend: Arc<dyn TrackerBackend>,
    state: Arc<Mutex<CalibrationState>>,
    worker: Mutex<Option<Worker>>,
    result_rx: Mutex<Option<Receiver<CalibrationWorkResult>>>,
}

impl CalibrationEngine {
    /// Creates an engine for the given backend. No thread is spawned until
    /// calibration mode is entered.
    pub fn new(backend: Arc<dyn TrackerBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(CalibrationState::NotYetEntered)),
            worker: Mutex::new(None),
            result_rx: Mutex::new(None),
        }
    }

    /// Enters calibration mode, fixing monocular/binocular for the session.
    ///
    /// Spawns the worker thread and queues the enter action; its device
    /// outcome arrives as a work result. Returns `Ok(false)` without doing
    /// anything if already in calibration mode.
    pub fn enter_calibration_mode(&self, monocular: bool) -> Result<bool> {
        let mut state = self.state.lock();
        if state.is_in_calibration_mode() {
            return Ok(false);
        }

        // Reap the worker of a previous calibration session, if any. It has
        // already exited its loop (the session ended with Exit).
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.handle.join();
        }

        let (command_tx, command_rx) = mpsc::channel::<CalibrationWorkItem>();
        let (result_tx, result_rx) = mpsc::channel::<CalibrationWorkResult>();

        let backend = Arc::clone(&self.backend);
        let worker_state = Arc::clone(&self.state);
        let handle = thread::spawn(move || {
            worker_loop(backend, command_rx, result_tx, worker_state, monocular);
        });

        command_tx
            .send(CalibrationWorkItem::enter())
            .expect("calibration worker exited before receiving its first command");

        *self.worker.lock() = Some(Worker { command_tx, handle });
        *self.result_rx.lock() = Some(result_rx);
        *state = CalibrationState::AwaitingCalPoint;
        log::debug!(
            "entered calibration mode ({})",
            if monocular { "monocular" } else { "binocular" }
        );
        Ok(true)
    }

    /// Returns whether the engine is in calibration mode.
    ///
    /// With `issue_error_if_not` set, not being in calibration mode is
    /// reported as the caller error the gated operations would raise.
    pub fn is_in_calibration_mode(&self, issue_error_if_not: Option<bool>) -> Result<bool> {
        let in_mode = self.state.lock().is_in_calibration_mode();
        if !in_mode && issue_error_if_not.unwrap_or(false) {
            return Err(Error::NotInCalibrationMode);
        }
        Ok(in_mode)
    }

    /// Leaves calibration mode.
    ///
    /// Without `force`, the engine must be idle (`AwaitingCalPoint`); leaving
    /// while an action executes is the busy caller error. With `force`, the
    /// in-flight device operation is aborted first and the exit is queued
    /// behind it, so the device is never left mid-operation. Returns the
    /// prior in-calibration-mode state.
    pub fn leave_calibration_mode(&self, force: Option<bool>) -> Result<bool> {
        let force = force.unwrap_or(false);
        let mut state = self.state.lock();
        if !state.is_in_calibration_mode() {
            return Ok(false);
        }
        if *state != CalibrationState::AwaitingCalPoint {
            if !force {
                return Err(Error::CalibrationBusy(*state));
            }
            // Unblock the worker's in-flight device call before queueing the
            // exit behind it.
            self.backend.calibration_abort();
        }

        // A send failure means the worker is already gone (its enter failed
        // device-side); the mode is over either way.
        let _ = self.send(CalibrationWorkItem::exit());
        *state = CalibrationState::Left;
        log::debug!("left calibration mode (force: {})", force);
        Ok(true)
    }

    /// Queues data collection for a stimulus point.
    pub fn collect_data(&self, point: Point2, eye: Option<Eye>) -> Result<()> {
        self.submit(
            CalibrationWorkItem::collect(point, eye),
            CalibrationState::CollectingData,
        )
    }

    /// Queues discarding of a stimulus point's collected data.
    pub fn discard_data(&self, point: Point2, eye: Option<Eye>) -> Result<()> {
        self.submit(
            CalibrationWorkItem::discard(point, eye),
            CalibrationState::DiscardingData,
        )
    }

    /// Queues computing and applying a calibration from the collected points.
    pub fn compute_and_apply(&self) -> Result<()> {
        self.submit(CalibrationWorkItem::compute(), CalibrationState::Computing)
    }

    /// Queues exporting the active calibration.
    pub fn get_data(&self) -> Result<()> {
        self.submit(
            CalibrationWorkItem::get_data(),
            CalibrationState::GettingCalibrationData,
        )
    }

    /// Queues applying a previously exported calibration blob.
    pub fn apply_data(&self, data: CalibrationData) -> Result<()> {
        self.submit(
            CalibrationWorkItem::apply_data(data),
            CalibrationState::ApplyingCalibrationData,
        )
    }

    /// Returns the current calibration state.
    pub fn get_status(&self) -> CalibrationState {
        *self.state.lock()
    }

    /// Retrieves the next completed work result.
    ///
    /// Blocking mode waits for the in-flight action to complete (returning
    /// `None` only once the session has ended and all results are drained);
    /// non-blocking mode returns `None` when nothing has completed since the
    /// last retrieval.
    pub fn retrieve_result(&self, blocking: bool) -> Option<CalibrationWorkResult> {
        let rx = self.result_rx.lock();
        let rx = rx.as_ref()?;
        if blocking {
            rx.recv().ok()
        } else {
            rx.try_recv().ok()
        }
    }

    /// Admits one action: checks the state machine, marks the engine busy,
    /// and hands the work item to the worker.
    fn submit(&self, item: CalibrationWorkItem, busy: CalibrationState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_in_calibration_mode() {
            return Err(Error::NotInCalibrationMode);
        }
        if *state != CalibrationState::AwaitingCalPoint {
            return Err(Error::CalibrationBusy(*state));
        }
        self.send(item)?;
        *state = busy;
        Ok(())
    }

    fn send(&self, item: CalibrationWorkItem) -> Result<()> {
        let worker = self.worker.lock();
        let sent = worker
            .as_ref()
            .map(|w| w.command_tx.send(item).is_ok())
            .unwrap_or(false);
        if sent {
            Ok(())
        } else {
            Err(Error::Device(DeviceError::new(
                DeviceStatus::InternalError,
                "calibration worker is not running",
            )))
        }
    }
}

impl Drop for CalibrationEngine {
    fn drop(&mut self) {
        // Best-effort: abort anything in flight, ask the worker to exit
        // calibration mode, and wait for it.
        let in_mode = self.state.lock().is_in_calibration_mode();
        if in_mode {
            self.backend.calibration_abort();
            let _ = self.send(CalibrationWorkItem::exit());
        }
        if let Some(worker) = self.worker.lock().take() {
            drop(worker.command_tx);
            let _ = worker.handle.join();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Executes work items one at a time until an exit item (or channel close).
fn worker_loop(
    backend: Arc<dyn TrackerBackend>,
    command_rx: Receiver<CalibrationWorkItem>,
    result_tx: Sender<CalibrationWorkResult>,
    state: Arc<Mutex<CalibrationState>>,
    monocular: bool,
) {
    while let Ok(item) = command_rx.recv() {
        let action = item.action;
        let result = execute(&*backend, item, monocular);
        let succeeded = result.status.is_ok();
        if result_tx.send(result).is_err() {
            // Engine gone; nobody can observe results or submit actions.
            return;
        }

        match action {
            CalibrationAction::Exit => {
                // Submission already moved the state to Left.
                return;
            }
            CalibrationAction::Enter => {
                if !succeeded {
                    let mut state = state.lock();
                    // A forced leave may have moved the state on already.
                    if *state == CalibrationState::AwaitingCalPoint {
                        *state = CalibrationState::NotYetEntered;
                    }
                    return;
                }
            }
            _ => {
                let mut state = state.lock();
                if *state == busy_state(action) {
                    *state = CalibrationState::AwaitingCalPoint;
                }
            }
        }
    }
}

/// The state the engine shows while `action` executes.
fn busy_state(action: CalibrationAction) -> CalibrationState {
    match action {
        CalibrationAction::CollectData => CalibrationState::CollectingData,
        CalibrationAction::DiscardData => CalibrationState::DiscardingData,
        CalibrationAction::Compute => CalibrationState::Computing,
        CalibrationAction::GetCalibrationData => CalibrationState::GettingCalibrationData,
        CalibrationAction::ApplyCalibrationData => CalibrationState::ApplyingCalibrationData,
        CalibrationAction::Nothing
        | CalibrationAction::Enter
        | CalibrationAction::Exit => CalibrationState::AwaitingCalPoint,
    }
}

/// Runs one work item against the device.
fn execute(
    backend: &dyn TrackerBackend,
    item: CalibrationWorkItem,
    monocular: bool,
) -> CalibrationWorkResult {
    let device_result = match (item.action, item.coordinates, &item.calibration_data) {
        (CalibrationAction::Nothing, _, _) => Ok(CalibrationOutcome::None),
        (CalibrationAction::Enter, _, _) => backend
            .calibration_enter(monocular)
            .map(|()| CalibrationOutcome::None),
        (CalibrationAction::CollectData, Some(point), _) => backend
            .calibration_collect(point, item.eye)
            .map(|()| CalibrationOutcome::None),
        (CalibrationAction::DiscardData, Some(point), _) => backend
            .calibration_discard(point, item.eye)
            .map(|()| CalibrationOutcome::None),
        (CalibrationAction::Compute, _, _) => backend
            .calibration_compute_apply()
            .map(CalibrationOutcome::Computed),
        (CalibrationAction::GetCalibrationData, _, _) => backend
            .calibration_get_data()
            .map(CalibrationOutcome::Exported),
        (CalibrationAction::ApplyCalibrationData, _, Some(data)) => backend
            .calibration_apply_data(data)
            .map(|()| CalibrationOutcome::None),
        (CalibrationAction::Exit, _, _) => {
            backend.calibration_exit().map(|()| CalibrationOutcome::None)
        }
        // A point/blob action without its payload cannot be built through the
        // constructors.
        (action, _, _) => Err(DeviceError::invalid_operation(format!(
            "work item for {:?} is missing its payload",
            action
        ))),
    };

    match device_result {
        Ok(outcome) => CalibrationWorkResult::succeeded(item, outcome),
        Err(error) => {
            log::debug!("calibration action {:?} failed: {}", item.action, error);
            CalibrationWorkResult::failed(item, error)
        }
    }
}
