use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use setagg_error::{DbError, Result};

pub trait BufferManager: Debug + Sync + Clone + Send + Sized {
    /// Try to reserve some number of bytes.
    ///
    /// Returns a reservation for keeping tracker of "used" bytes.
    ///
    /// This should never error when attempting to reserve zero bytes.
    fn try_reserve(&self, size_bytes: usize) -> Result<Reservation<Self>>;

    /// Drops a memory reservation.
    fn drop_reservation(&self, reservation: &Reservation<Self>);
}

/// Bytes reserved from a buffer manager.
///
/// Reservations are not released on drop. The owner must hand the reservation
/// back through `free`. Containers built on top of the manager are torn down
/// explicitly before the memory they sit on is reclaimed.
#[derive(Debug)]
pub struct Reservation<B: BufferManager> {
    manager: B,
    /// Size in bytes of the memory reservation.
    size: usize,
}

impl<B> Reservation<B>
where
    B: BufferManager,
{
    /// Create an empty reservation.
    pub fn empty(manager: &B) -> Self {
        Reservation {
            manager: manager.clone(),
            size: 0,
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.size += other.size;
    }

    /// Grow this reservation by `additional` bytes.
    pub fn grow(&mut self, additional: usize) -> Result<()> {
        if additional == 0 {
            return Ok(());
        }
        let other = self.manager.try_reserve(additional)?;
        self.merge(other);
        Ok(())
    }

    pub const fn manager(&self) -> &B {
        &self.manager
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Release the reserved bytes back to the manager.
    ///
    /// The reservation is left empty and may be grown again.
    pub fn free(&mut self) {
        if self.size == 0 {
            return;
        }
        self.manager.drop_reservation(self);
        self.size = 0;
    }
}

/// Placeholder buffer manager.
#[derive(Debug, Clone)]
pub struct NopBufferManager;

impl BufferManager for NopBufferManager {
    fn try_reserve(&self, size_bytes: usize) -> Result<Reservation<Self>> {
        Ok(Reservation {
            manager: self.clone(),
            size: size_bytes,
        })
    }

    fn drop_reservation(&self, _reservation: &Reservation<Self>) {
        // Ok
    }
}

/// Buffer manager tracking reserved bytes against an optional limit.
///
/// Clones share the same tracker, so a single manager may be handed to many
/// accumulators across threads.
#[derive(Debug, Clone)]
pub struct TrackedBufferManager {
    tracker: Arc<MemoryTracker>,
}

#[derive(Debug)]
struct MemoryTracker {
    /// Max number of bytes that can be reserved. None for unlimited.
    limit: Option<usize>,
    /// Currently reserved bytes.
    used: AtomicUsize,
}

impl TrackedBufferManager {
    pub fn new(limit: Option<usize>) -> Self {
        TrackedBufferManager {
            tracker: Arc::new(MemoryTracker {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn limit(&self) -> Option<usize> {
        self.tracker.limit
    }

    /// Number of bytes currently reserved.
    pub fn used_bytes(&self) -> usize {
        self.tracker.used.load(Ordering::Acquire)
    }
}

impl Default for TrackedBufferManager {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl BufferManager for TrackedBufferManager {
    fn try_reserve(&self, size_bytes: usize) -> Result<Reservation<Self>> {
        let limit = self.tracker.limit;
        let result = self
            .tracker
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let new_used = used.checked_add(size_bytes)?;
                match limit {
                    Some(limit) if new_used > limit => None,
                    _ => Some(new_used),
                }
            });

        match result {
            Ok(_) => Ok(Reservation {
                manager: self.clone(),
                size: size_bytes,
            }),
            Err(used) => Err(DbError::new("Failed to reserve memory, limit exceeded")
                .with_field("requested", size_bytes)
                .with_field("used", used)
                .with_field("limit", limit.unwrap_or(usize::MAX))),
        }
    }

    fn drop_reservation(&self, reservation: &Reservation<Self>) {
        self.tracker
            .used
            .fetch_sub(reservation.size(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_free() {
        let manager = TrackedBufferManager::unlimited();
        let mut res = manager.try_reserve(64).unwrap();
        assert_eq!(64, manager.used_bytes());

        res.grow(32).unwrap();
        assert_eq!(96, res.size());
        assert_eq!(96, manager.used_bytes());

        res.free();
        assert_eq!(0, res.size());
        assert_eq!(0, manager.used_bytes());
    }

    #[test]
    fn reserve_over_limit() {
        let manager = TrackedBufferManager::new(Some(100));
        let _res = manager.try_reserve(80).unwrap();

        let err = manager.try_reserve(40).unwrap_err();
        assert_eq!(Some("40"), err.get_field("requested"));
        assert_eq!(Some("80"), err.get_field("used"));

        // Failed reservation doesn't count against usage.
        assert_eq!(80, manager.used_bytes());
    }

    #[test]
    fn reserve_zero_never_fails() {
        let manager = TrackedBufferManager::new(Some(0));
        let res = manager.try_reserve(0).unwrap();
        assert_eq!(0, res.size());
    }

    #[test]
    fn clones_share_tracker() {
        let manager = TrackedBufferManager::new(Some(1024));
        let other = manager.clone();

        let mut res = other.try_reserve(512).unwrap();
        assert_eq!(512, manager.used_bytes());

        res.free();
        assert_eq!(0, manager.used_bytes());
    }
}
