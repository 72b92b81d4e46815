use crate::{
    layout::{BitLayout, IdParts},
    time::TimeSource,
    worker::WorkerId,
};

/// A minimal interface for allocating Snowflake IDs.
///
/// Implementations share one algorithm and differ only in how they make the
/// read-decide-write of their state atomic.
pub trait IdAllocator<T>
where
    T: TimeSource,
{
    /// Creates an allocator whose last-issued timestamp is the clock's
    /// current reading.
    ///
    /// Nothing is validated here; use [`Bootstrap`](crate::Bootstrap) to
    /// build an allocator from untrusted configuration.
    fn new(layout: BitLayout, worker_id: WorkerId, epoch: u64, time: T) -> Self;

    /// Returns the next ID.
    ///
    /// Never fails. If the clock has moved backwards, or the current
    /// millisecond's sequence is used up, the calling thread spins until the
    /// clock reaches a later millisecond.
    fn next_id(&self) -> u64;

    fn layout(&self) -> &BitLayout;

    fn worker_id(&self) -> WorkerId;

    /// Epoch of the timestamp field, in Unix milliseconds.
    fn epoch(&self) -> u64;

    /// Splits `id` into its fields under this allocator's layout.
    fn decompose(&self, id: u64) -> IdParts {
        self.layout().decompose(id)
    }

    /// Wall-clock Unix milliseconds at which `id` was issued.
    fn unix_millis(&self, id: u64) -> u64 {
        self.epoch() + self.decompose(id).timestamp
    }
}
