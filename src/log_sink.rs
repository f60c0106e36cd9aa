//! Process-wide sink for device log messages and stream errors.
//!
//! Logging is global, not per-instance: the device SDK reports log messages
//! and stream errors for the whole process, before any particular tracker
//! session exists. The sink is lazily initialized by the first
//! [`start_logging`] and lives until the process exits.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::types::LogEntry;

/// Default number of entries kept when no size hint is given.
const DEFAULT_LOG_BUF_SIZE: usize = 128;

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    active: bool,
}

static SINK: Mutex<Option<LogBuffer>> = Mutex::new(None);

/// Starts capturing log entries, keeping at most `buf_size_hint` of them.
///
/// The sink is a ring: once full, the oldest entry is evicted per append.
/// Returns false without touching the buffer if logging is already active.
pub fn start_logging(buf_size_hint: Option<usize>) -> bool {
    let mut sink = SINK.lock();
    match sink.as_mut() {
        Some(buffer) if buffer.active => false,
        Some(buffer) => {
            // Reactivation after stop_logging: existing entries are kept.
            buffer.capacity = buf_size_hint.unwrap_or(buffer.capacity).max(1);
            buffer.active = true;
            true
        }
        None => {
            let capacity = buf_size_hint.unwrap_or(DEFAULT_LOG_BUF_SIZE).max(1);
            *sink = Some(LogBuffer {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                active: true,
            });
            true
        }
    }
}

/// Returns all accumulated entries, draining them when `clear` is true
/// (default: entries are kept).
///
/// Entries accumulated before a [`stop_logging`] remain retrievable until
/// drained.
pub fn get_log(clear: Option<bool>) -> Vec<LogEntry> {
    let mut sink = SINK.lock();
    let Some(buffer) = sink.as_mut() else {
        return Vec::new();
    };
    if clear.unwrap_or(false) {
        buffer.entries.drain(..).collect()
    } else {
        buffer.entries.iter().cloned().collect()
    }
}

/// Stops capturing log entries.
///
/// Returns the prior active state. Buffered entries persist until drained
/// via [`get_log`].
pub fn stop_logging() -> bool {
    let mut sink = SINK.lock();
    match sink.as_mut() {
        Some(buffer) => std::mem::replace(&mut buffer.active, false),
        None => false,
    }
}

/// Producer handle a device backend uses to deliver log entries.
///
/// Appends are dropped while logging is inactive; a backend can hold the
/// handle for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSinkHandle;

impl LogSinkHandle {
    /// Creates a handle to the process-wide sink.
    pub fn new() -> Self {
        LogSinkHandle
    }

    /// Appends one entry, evicting the oldest if the ring is full.
    pub fn append(&self, entry: LogEntry) {
        let mut sink = SINK.lock();
        let Some(buffer) = sink.as_mut() else {
            return;
        };
        if !buffer.active {
            return;
        }
        if buffer.entries.len() == buffer.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogLevel, LogMessage, LogSource};

    // The sink is process-global and the test harness is multi-threaded, so
    // every test that touches it serializes on this lock and resets state.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn reset() {
        *SINK.lock() = None;
    }

    fn message(ts: i64, text: &str) -> LogEntry {
        LogEntry::Message(LogMessage {
            system_time_stamp: ts,
            source: LogSource::Sdk,
            level: LogLevel::Information,
            message: text.to_string(),
        })
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let _guard = TEST_LOCK.lock();
        reset();

        assert!(start_logging(None));
        assert!(!start_logging(Some(64)));
        assert!(stop_logging());
        assert!(!stop_logging());
    }

    #[test]
    fn test_get_log_drains_only_when_asked() {
        let _guard = TEST_LOCK.lock();
        reset();

        start_logging(None);
        let handle = LogSinkHandle::new();
        handle.append(message(1, "one"));
        handle.append(message(2, "two"));

        assert_eq!(get_log(None).len(), 2);
        assert_eq!(get_log(Some(false)).len(), 2);
        assert_eq!(get_log(Some(true)).len(), 2);
        assert!(get_log(None).is_empty());
    }

    #[test]
    fn test_entries_survive_stop_until_drained() {
        let _guard = TEST_LOCK.lock();
        reset();

        start_logging(None);
        LogSinkHandle::new().append(message(1, "kept"));
        stop_logging();

        // Appends while stopped are discarded, earlier entries remain.
        LogSinkHandle::new().append(message(2, "dropped"));
        let entries = get_log(Some(true));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].system_time_stamp(), 1);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let _guard = TEST_LOCK.lock();
        reset();

        start_logging(Some(2));
        let handle = LogSinkHandle::new();
        handle.append(message(1, "a"));
        handle.append(message(2, "b"));
        handle.append(message(3, "c"));

        let entries = get_log(Some(true));
        let stamps: Vec<i64> = entries.iter().map(|e| e.system_time_stamp()).collect();
        assert_eq!(stamps, [2, 3]);
    }
}
