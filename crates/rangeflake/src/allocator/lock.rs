use parking_lot::Mutex;

use crate::{
    allocator::{IdAllocator, Tick},
    layout::BitLayout,
    time::TimeSource,
    worker::WorkerId,
};

/// A lock-based allocator suitable for multi-threaded environments.
///
/// One [`Mutex`] guards the `(timestamp, sequence)` pair for the whole of
/// [`next_id`](Self::next_id), including the clock read and any spin-wait,
/// so concurrent callers are served strictly one at a time.
///
/// ## Recommended When
/// - Fair access across threads matters more than peak throughput
/// - Your layout leaves few timestamp bits (see [`AtomicAllocator`])
///
/// [`AtomicAllocator`]: crate::AtomicAllocator
pub struct LockAllocator<T>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<Mutex<Tick>>,
    #[cfg(not(feature = "cache-padded"))]
    state: Mutex<Tick>,
    layout: BitLayout,
    worker_id: WorkerId,
    epoch: u64,
    time: T,
}

impl<T> LockAllocator<T>
where
    T: TimeSource,
{
    /// Creates an allocator for `worker_id`, counting time from `epoch`.
    ///
    /// # Example
    /// ```
    /// use rangeflake::{BitLayout, LockAllocator, SystemClock, TimeSource, WorkerId};
    ///
    /// let layout = BitLayout::default();
    /// let worker = WorkerId::new(3, &layout).unwrap();
    /// let epoch = SystemClock.current_millis() - 1_000;
    /// let allocator = LockAllocator::new(layout, worker, epoch, SystemClock);
    ///
    /// let a = allocator.next_id();
    /// let b = allocator.next_id();
    /// assert!(a < b);
    /// assert_eq!(layout.decompose(b).worker_id, 3);
    /// ```
    pub fn new(layout: BitLayout, worker_id: WorkerId, epoch: u64, time: T) -> Self {
        let tick = Tick::new(time.current_millis());
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(Mutex::new(tick)),
            #[cfg(not(feature = "cache-padded"))]
            state: Mutex::new(tick),
            layout,
            worker_id,
            epoch,
            time,
        }
    }

    /// Returns the next ID, holding the lock across the clock read, any
    /// spin-wait, and the compose.
    pub fn next_id(&self) -> u64 {
        let mut tick = self.state.lock();
        let now = self.time.current_millis();
        tick.advance(now, self.layout.sequence_mask(), &self.time);
        self.layout.compose(
            tick.timestamp.saturating_sub(self.epoch),
            self.worker_id.get(),
            tick.sequence,
        )
    }
}

impl<T> core::fmt::Debug for LockAllocator<T>
where
    T: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockAllocator")
            .field("layout", &self.layout)
            .field("worker_id", &self.worker_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl<T> IdAllocator<T> for LockAllocator<T>
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
