mod atomic;
mod interface;
mod lock;

pub use atomic::*;
pub use interface::*;
pub use lock::*;

use crate::time::TimeSource;

/// The mutable half of an allocator: the last issued wall-clock millisecond
/// and the sequence used within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tick {
    pub(crate) timestamp: u64,
    pub(crate) sequence: u64,
}

impl Tick {
    pub(crate) const fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            sequence: 0,
        }
    }

    /// Moves to the next `(timestamp, sequence)` pair for a clock reading of
    /// `now`, spinning on `time` when the clock is behind or the current
    /// millisecond has no sequence left.
    #[inline]
    pub(crate) fn advance<T: TimeSource>(&mut self, now: u64, sequence_mask: u64, time: &T) {
        let now = if now < self.timestamp {
            self.cold_clock_behind(now, time)
        } else {
            now
        };

        if now == self.timestamp {
            self.sequence = self.sequence.wrapping_add(1) & sequence_mask;
            if self.sequence == 0 {
                self.timestamp = self.wait_next_millis(time);
            }
        } else {
            self.sequence = 0;
            self.timestamp = now;
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind<T: TimeSource>(&mut self, now: u64, time: &T) -> u64 {
        tracing::warn!(
            last = self.timestamp,
            now,
            behind_ms = self.timestamp - now,
            "clock moved backwards, waiting for it to catch up"
        );
        self.wait_next_millis(time)
    }

    /// Busy-polls the clock until it reads past `self.timestamp`, then resets
    /// the sequence for the new millisecond.
    ///
    /// There is no sleep and no cap: this burns a core for as long as the
    /// clock lags, which is a full rollback's duration if the wall clock was
    /// stepped back.
    fn wait_next_millis<T: TimeSource>(&mut self, time: &T) -> u64 {
        let mut now = time.current_millis();
        while now <= self.timestamp {
            core::hint::spin_loop();
            now = time.current_millis();
        }
        self.sequence = 0;
        now
    }
}
