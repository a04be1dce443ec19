//! Freeze / snapshot / resume protocol shared by the buffered accumulators.
//!
//! Writers call [`Buffer::append`] before touching the accumulator. While no
//! collection is running that is a single `fetch_add` and the writer applies
//! its observation directly. While a collection is running the observation is
//! parked in an overflow array and replayed once the snapshot has been taken,
//! so it shows up in the next snapshot instead.

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

const PAUSED: u64 = 1 << 63;
const SEQUENCE_MASK: u64 = PAUSED - 1;

#[derive(Debug, Default)]
pub struct Buffer {
    // The most significant bit is the paused flag. The remaining 63 bits
    // count append calls since creation (or since the last reset).
    //
    // Pausing and resuming both add PAUSED: the flag lives in the top bit,
    // so the second add wraps it back to zero without disturbing the count.
    progress: AtomicU64,

    // Observations diverted during a pause window.
    overflow: Mutex<Vec<f64>>,

    // Number of values in overflow, published after each push so the
    // collector can wait for diverted writers without taking the lock.
    cursor: AtomicUsize,

    // Serializes run_atomic. A collection and a writer-triggered rescale
    // must never overlap.
    run_lock: Mutex<()>,

    // Set from inside a snapshot closure when the accumulator has been
    // zeroed, so the progress count restarts instead of resuming.
    reset: AtomicBool,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the value was buffered and will be replayed later.
    /// On `false` the caller applies the observation itself.
    pub fn append(&self, value: f64) -> bool {
        let n = self.progress.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if n & PAUSED == 0 {
            return false;
        }
        let mut overflow = self.overflow.lock();
        overflow.push(value);
        self.cursor.store(overflow.len(), Ordering::Release);
        true
    }

    /// Marks the accumulator as zeroed. Only meaningful when called from the
    /// `take_snapshot` closure of [`Buffer::run_atomic`].
    pub fn reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    /// Number of append calls counted so far, excluding the paused flag.
    pub fn appended(&self) -> u64 {
        self.progress.load(Ordering::Acquire) & SEQUENCE_MASK
    }

    pub fn is_paused(&self) -> bool {
        self.progress.load(Ordering::Acquire) & PAUSED != 0
    }

    /// Pauses the fast path, waits until `is_caught_up` confirms every
    /// directly-applied observation has landed, takes the snapshot, resumes,
    /// and replays whatever was diverted in the meantime.
    ///
    /// `is_caught_up` receives the number of appends that happened before the
    /// pause. The pause is always lifted, even if a closure panics.
    pub fn run_atomic<T>(
        &self,
        is_caught_up: impl Fn(u64) -> bool,
        take_snapshot: impl FnOnce() -> T,
        replay: impl FnMut(f64),
    ) -> T {
        let _serialized = self.run_lock.lock();
        let mut pause = Pause::begin(self, replay);

        let backoff = Backoff::new();
        while !is_caught_up(pause.start) {
            backoff.snooze();
        }

        let result = take_snapshot();
        pause.finish();
        result
    }

    // Clears the paused flag and returns how many appends arrived while it
    // was set.
    fn resume(&self, start: u64) -> u64 {
        if !self.reset.swap(false, Ordering::AcqRel) {
            let n = self.progress.fetch_add(PAUSED, Ordering::AcqRel).wrapping_add(PAUSED);
            return (n & SEQUENCE_MASK) - start;
        }
        // The accumulator was zeroed: restart the count at the number of
        // values about to be replayed into it.
        let mut current = self.progress.load(Ordering::Acquire);
        loop {
            let pending = (current & SEQUENCE_MASK) - start;
            match self.progress.compare_exchange_weak(
                current,
                pending,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return pending,
                Err(actual) => current = actual,
            }
        }
    }
}

struct Pause<'a, R: FnMut(f64)> {
    buffer: &'a Buffer,
    start: u64,
    replay: R,
    finished: bool,
}

impl<'a, R: FnMut(f64)> Pause<'a, R> {
    fn begin(buffer: &'a Buffer, replay: R) -> Self {
        let start = buffer.progress.fetch_add(PAUSED, Ordering::AcqRel) & SEQUENCE_MASK;
        Pause {
            buffer,
            start,
            replay,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let pending = self.buffer.resume(self.start);
        let backoff = Backoff::new();
        while (self.buffer.cursor.load(Ordering::Acquire) as u64) < pending {
            backoff.snooze();
        }
        let diverted = std::mem::take(&mut *self.buffer.overflow.lock());
        self.buffer.cursor.store(0, Ordering::Release);
        for value in diverted {
            (self.replay)(value);
        }
    }
}

impl<R: FnMut(f64)> Drop for Pause<'_, R> {
    fn drop(&mut self) {
        self.finish();
    }
}
