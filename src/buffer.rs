//! The per-stream concurrent sample buffer.
//!
//! A [`StreamBuffer`] sits between one producer (the device callback thread)
//! and one consumer (the caller thread). The producer's critical section is a
//! single append under an uncontended mutex, so device callbacks are never
//! stalled by a slow consumer; the buffer grows rather than evicting, because
//! dropped samples are unacceptable for a recording instrument.
//!
//! Consumption is by count ([`consume_n`](StreamBuffer::consume_n)) or by
//! time range ([`consume_time_range`](StreamBuffer::consume_time_range)),
//! each with a non-destructive `peek_*` twin. Records come back in arrival
//! order. Time-range access exists only for record types that implement
//! [`TimeRanged`]; the positioning stream does not, and its rejection is
//! handled at the registry's dispatch.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{BufferSide, TimeRanged};

/// A growable, thread-safe, arrival-ordered buffer of samples of one stream.
///
/// Created inactive and empty; [`start`](Self::start) activates it,
/// [`stop`](Self::stop) deactivates it. A stopped buffer keeps its contents
/// (unless asked to clear) so data recorded before the stop can still be
/// consumed. Buffers are reusable across stop/start cycles, which is how the
/// "temp buffer" pattern works: start before an operation of interest,
/// consume, stop and clear afterwards.
#[derive(Debug)]
pub struct StreamBuffer<T> {
    samples: Mutex<VecDeque<T>>,
    active: AtomicBool,
}

impl<T> Default for StreamBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamBuffer<T> {
    /// Creates an inactive, empty buffer.
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(false),
        }
    }

    /// Activates the buffer, reserving room for `buf_size_hint` records.
    ///
    /// Returns false only if the reservation fails. Starting an already
    /// active buffer is a no-op success and does NOT clear existing data.
    /// The hint is a preallocation size, not a capacity bound: the buffer
    /// grows past it rather than discarding records.
    pub fn start(&self, buf_size_hint: Option<usize>) -> bool {
        if let Some(hint) = buf_size_hint {
            let mut samples = self.samples.lock();
            let have = samples.capacity();
            if hint > have && samples.try_reserve(hint - have).is_err() {
                return false;
            }
        }
        self.active.store(true, Ordering::Release);
        true
    }

    /// Returns whether the buffer is currently active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Appends one record at the tail.
    ///
    /// This is the producer entry point, invoked from the device callback
    /// thread. It does nothing beyond the append; records arriving after
    /// [`stop`](Self::stop) (a callback already in flight while the stream
    /// was being shut down) are discarded, since the stream is no longer
    /// recording.
    pub fn push(&self, record: T) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.samples.lock().push_back(record);
    }

    /// Returns the number of buffered records.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Returns true if no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Removes and returns up to `n` records (default: all).
    ///
    /// `side` selects which end the records are taken from when `n` is less
    /// than the buffer length: [`BufferSide::Start`] takes the oldest prefix,
    /// [`BufferSide::End`] the newest suffix. Either way the returned records
    /// keep their arrival order. An empty buffer yields an empty `Vec`.
    pub fn consume_n(&self, n: Option<usize>, side: BufferSide) -> Vec<T> {
        let mut samples = self.samples.lock();
        let take = n.unwrap_or(usize::MAX).min(samples.len());
        match side {
            BufferSide::Start => samples.drain(..take).collect(),
            BufferSide::End => {
                let skip = samples.len() - take;
                samples.drain(skip..).collect()
            }
        }
    }

    /// Stops the buffer, optionally clearing it.
    ///
    /// Returns the prior active state, so a caller can tell whether the
    /// stream was actually recording.
    pub fn stop(&self, clear: bool) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if clear {
            self.samples.lock().clear();
        }
        was_active
    }

    /// Discards all buffered records. The buffer stays active.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl<T: Clone> StreamBuffer<T> {
    /// Non-destructive twin of [`consume_n`](Self::consume_n): returns copies
    /// of the selected records and leaves the buffer unchanged.
    pub fn peek_n(&self, n: Option<usize>, side: BufferSide) -> Vec<T> {
        let samples = self.samples.lock();
        let take = n.unwrap_or(usize::MAX).min(samples.len());
        let skip = match side {
            BufferSide::Start => 0,
            BufferSide::End => samples.len() - take,
        };
        samples.iter().skip(skip).take(take).cloned().collect()
    }
}

impl<T: TimeRanged> StreamBuffer<T> {
    /// Removes and returns the contiguous run of records whose range
    /// timestamp satisfies `start <= t <= end`.
    ///
    /// Omitted bounds are open. Records outside the run remain buffered. The
    /// run is located from both ends (first record at or after `start`, last
    /// record at or before `end`), which keeps the selection contiguous even
    /// when the device clock jitters within the run.
    pub fn consume_time_range(&self, start: Option<i64>, end: Option<i64>) -> Vec<T> {
        let mut samples = self.samples.lock();
        match time_range_bounds(&samples, start, end) {
            Some((lo, hi)) => samples.drain(lo..=hi).collect(),
            None => Vec::new(),
        }
    }

    /// Discards the records a `consume_time_range` with the same bounds
    /// would return, in place.
    pub fn clear_time_range(&self, start: Option<i64>, end: Option<i64>) {
        let mut samples = self.samples.lock();
        if let Some((lo, hi)) = time_range_bounds(&samples, start, end) {
            samples.drain(lo..=hi);
        }
    }
}

impl<T: TimeRanged + Clone> StreamBuffer<T> {
    /// Non-destructive twin of
    /// [`consume_time_range`](Self::consume_time_range).
    pub fn peek_time_range(&self, start: Option<i64>, end: Option<i64>) -> Vec<T> {
        let samples = self.samples.lock();
        match time_range_bounds(&samples, start, end) {
            Some((lo, hi)) => samples.iter().skip(lo).take(hi - lo + 1).cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Locates the inclusive index range of records inside `[start, end]`.
///
/// Returns `None` when no record falls inside the bounds.
fn time_range_bounds<T: TimeRanged>(
    samples: &VecDeque<T>,
    start: Option<i64>,
    end: Option<i64>,
) -> Option<(usize, usize)> {
    if samples.is_empty() {
        return None;
    }
    let lo = match start {
        Some(s) => samples.iter().position(|r| r.range_time() >= s)?,
        None => 0,
    };
    let hi = match end {
        Some(e) => samples.iter().rposition(|r| r.range_time() <= e)?,
        None => samples.len() - 1,
    };
    if lo > hi {
        return None;
    }
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Sample {
        device: i64,
        system: i64,
    }

    impl TimeRanged for Sample {
        fn range_time(&self) -> i64 {
            self.device
        }
    }

    fn stamped(ts: &[i64]) -> StreamBuffer<Sample> {
        let buf = StreamBuffer::new();
        buf.start(None);
        for &t in ts {
            buf.push(Sample { device: t, system: t });
        }
        buf
    }

    #[test]
    fn test_push_requires_started_buffer() {
        let buf: StreamBuffer<Sample> = StreamBuffer::new();
        buf.push(Sample { device: 1, system: 1 });
        assert!(buf.is_empty());

        buf.start(Some(16));
        buf.push(Sample { device: 1, system: 1 });
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_restart_does_not_clear() {
        let buf = stamped(&[100, 200]);
        assert!(buf.start(Some(1000)));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_consume_n_sides_preserve_order() {
        let buf = stamped(&[100, 200, 300, 400, 500]);

        let head = buf.consume_n(Some(2), BufferSide::Start);
        assert_eq!(head.iter().map(|s| s.device).collect::<Vec<_>>(), [100, 200]);
        assert_eq!(buf.len(), 3);

        let tail = buf.consume_n(Some(2), BufferSide::End);
        assert_eq!(tail.iter().map(|s| s.device).collect::<Vec<_>>(), [400, 500]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_consume_n_more_than_buffered_returns_everything() {
        let buf = stamped(&[100, 200]);
        assert_eq!(buf.consume_n(Some(10), BufferSide::Start).len(), 2);
        assert!(buf.consume_n(None, BufferSide::Start).is_empty());
    }

    #[test]
    fn test_consume_all_drains_exactly_once() {
        let buf = stamped(&[1, 2, 3]);
        assert_eq!(buf.consume_n(None, BufferSide::Start).len(), 3);
        assert!(buf.consume_n(None, BufferSide::Start).is_empty());
    }

    #[test]
    fn test_peek_is_idempotent() {
        let buf = stamped(&[100, 200, 300]);
        let first = buf.peek_n(Some(2), BufferSide::End);
        let second = buf.peek_n(Some(2), BufferSide::End);
        assert_eq!(first, second);
        assert_eq!(first.iter().map(|s| s.device).collect::<Vec<_>>(), [200, 300]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_time_range_consume_then_peek() {
        // The concrete scenario from the design: 100..500, take 2 from the
        // start, then work on [300, 400] by peek and consume.
        let buf = stamped(&[100, 200, 300, 400, 500]);

        let head = buf.consume_n(Some(2), BufferSide::Start);
        assert_eq!(head.iter().map(|s| s.device).collect::<Vec<_>>(), [100, 200]);

        let peeked = buf.peek_time_range(Some(300), Some(400));
        assert_eq!(peeked.iter().map(|s| s.device).collect::<Vec<_>>(), [300, 400]);
        assert_eq!(buf.len(), 3);

        let taken = buf.consume_time_range(Some(300), Some(400));
        assert_eq!(taken.iter().map(|s| s.device).collect::<Vec<_>>(), [300, 400]);

        let rest = buf.consume_n(None, BufferSide::Start);
        assert_eq!(rest.iter().map(|s| s.device).collect::<Vec<_>>(), [500]);
    }

    #[test]
    fn test_time_range_consume_is_exhaustive() {
        let buf = stamped(&[100, 200, 300]);
        assert_eq!(buf.consume_time_range(Some(100), Some(300)).len(), 3);
        assert!(buf.consume_time_range(Some(100), Some(300)).is_empty());
    }

    #[test]
    fn test_time_range_partition_accounts_for_every_record() {
        let buf = stamped(&[10, 20, 30, 40, 50, 60]);
        let a = buf.consume_time_range(None, Some(25));
        let b = buf.consume_time_range(Some(26), Some(45));
        let c = buf.consume_time_range(Some(46), None);
        assert_eq!(a.len() + b.len() + c.len(), 6);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_open_ended_bounds() {
        let buf = stamped(&[100, 200, 300]);
        assert_eq!(buf.peek_time_range(Some(200), None).len(), 2);
        assert_eq!(buf.peek_time_range(None, Some(200)).len(), 2);
        assert_eq!(buf.peek_time_range(None, None).len(), 3);
        assert!(buf.peek_time_range(Some(301), None).is_empty());
    }

    #[test]
    fn test_clear_time_range_leaves_the_rest() {
        let buf = stamped(&[100, 200, 300, 400]);
        buf.clear_time_range(Some(200), Some(300));
        let rest = buf.consume_n(None, BufferSide::Start);
        assert_eq!(rest.iter().map(|s| s.device).collect::<Vec<_>>(), [100, 400]);
    }

    #[test]
    fn test_stop_reports_prior_state_and_keeps_data() {
        let buf = stamped(&[100]);
        assert!(buf.stop(false));
        assert!(!buf.stop(false));
        assert_eq!(buf.len(), 1);

        buf.start(None);
        assert!(buf.stop(true));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_concurrent_push_preserves_arrival_order() {
        let buf = Arc::new(StreamBuffer::new());
        buf.start(Some(4096));

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for t in 0..2000i64 {
                    buf.push(Sample { device: t, system: t });
                }
            })
        };

        // Consume concurrently with the producer; the concatenation of all
        // drained batches must be the full ascending sequence.
        let mut seen = Vec::new();
        while seen.len() < 2000 {
            seen.extend(buf.consume_n(None, BufferSide::Start));
        }
        producer.join().unwrap();

        let order: Vec<i64> = seen.iter().map(|s| s.system).collect();
        assert_eq!(order, (0..2000).collect::<Vec<_>>());
    }
}
