use portable_atomic::{AtomicU64, Ordering};

use crate::{
    allocator::{IdAllocator, Tick},
    layout::BitLayout,
    time::TimeSource,
    worker::WorkerId,
};

/// A lock-free allocator suitable for multi-threaded environments.
///
/// The last issued ID is the whole state: its timestamp and sequence fields
/// are the `(timestamp, sequence)` pair, so one [`AtomicU64`] holds it and a
/// compare-and-swap publishes each new ID. A thread that loses the race
/// starts over from a fresh clock read.
///
/// ## Caveats
/// Because the timestamp is recovered from the stored ID, it must fit the
/// layout's timestamp field. [`Bootstrap`](crate::Bootstrap) checks this at
/// construction; the field then lasts `2^timestamp_bits` milliseconds past
/// the epoch.
///
/// ## Recommended When
/// - Throughput under contention matters more than fairness
pub struct AtomicAllocator<T>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
    layout: BitLayout,
    worker_id: WorkerId,
    epoch: u64,
    time: T,
}

impl<T> AtomicAllocator<T>
where
    T: TimeSource,
{
    /// Creates an allocator for `worker_id`, counting time from `epoch`.
    ///
    /// # Example
    /// ```
    /// use rangeflake::{AtomicAllocator, BitLayout, SystemClock, TimeSource, WorkerId};
    ///
    /// let layout = BitLayout::default();
    /// let worker = WorkerId::new(7, &layout).unwrap();
    /// let epoch = SystemClock.current_millis() - 1_000;
    /// let allocator = AtomicAllocator::new(layout, worker, epoch, SystemClock);
    ///
    /// let a = allocator.next_id();
    /// let b = allocator.next_id();
    /// assert!(a < b);
    /// ```
    pub fn new(layout: BitLayout, worker_id: WorkerId, epoch: u64, time: T) -> Self {
        let elapsed = time.current_millis().saturating_sub(epoch);
        let initial = layout.compose(elapsed, worker_id.get(), 0);
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU64::new(initial)),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU64::new(initial),
            layout,
            worker_id,
            epoch,
            time,
        }
    }

    /// Returns the next ID.
    ///
    /// The clock read, any spin-wait, and the compose happen against a
    /// snapshot; the result is only issued if the snapshot is still current
    /// when it is swapped in.
    pub fn next_id(&self) -> u64 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let mut tick = self.tick_of(current);
            let now = self.time.current_millis();
            tick.advance(now, self.layout.sequence_mask(), &self.time);
            let next = self.layout.compose(
                tick.timestamp.saturating_sub(self.epoch),
                self.worker_id.get(),
                tick.sequence,
            );

            match self.state.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => {
                    current = actual;
                    core::hint::spin_loop();
                }
            }
        }
    }

    fn tick_of(&self, id: u64) -> Tick {
        let parts = self.layout.decompose(id);
        Tick {
            timestamp: self.epoch + parts.timestamp,
            sequence: parts.sequence,
        }
    }
}

impl<T> core::fmt::Debug for AtomicAllocator<T>
where
    T: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtomicAllocator")
            .field("layout", &self.layout)
            .field("worker_id", &self.worker_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl<T> IdAllocator<T> for AtomicAllocator<T>
where
    T: TimeSource,
{
    fn new(layout: BitLayout, worker_id: WorkerId, epoch: u64, time: T) -> Self {
        Self::new(layout, worker_id, epoch, time)
    }

    fn next_id(&self) -> u64 {
        self.next_id()
    }

    fn layout(&self) -> &BitLayout {
        &self.layout
    }

    fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}
