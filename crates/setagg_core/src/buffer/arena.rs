use setagg_error::{DbError, Result};

use super::buffer_manager::{BufferManager, Reservation};

/// Minimum number of elements to allocate for when growing from empty.
const MIN_CAPACITY: usize = 8;

/// A growable vec whose allocation is reserved through a buffer manager.
///
/// Elements are referenced by index. Growing the vec may move the underlying
/// allocation, but an element's index never changes until the vec is
/// truncated or freed.
#[derive(Debug)]
pub struct ArenaVec<T, B: BufferManager> {
    values: Vec<T>,
    reservation: Reservation<B>,
}

impl<T, B> ArenaVec<T, B>
where
    B: BufferManager,
{
    pub fn new(manager: &B) -> Self {
        ArenaVec {
            values: Vec::new(),
            reservation: Reservation::empty(manager),
        }
    }

    pub fn try_with_capacity(manager: &B, cap: usize) -> Result<Self> {
        let mut vec = Self::new(manager);
        vec.reserve_for_size(cap)?;
        Ok(vec)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Number of bytes reserved for this vec.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    /// Ensure capacity for holding `size` elements.
    ///
    /// Amortizes reallocations by doubling the current capacity if that's
    /// larger.
    pub fn reserve_for_size(&mut self, size: usize) -> Result<()> {
        let cap = self.values.capacity();
        if size <= cap {
            return Ok(());
        }

        let new_cap = usize::max(size, usize::max(cap.saturating_mul(2), MIN_CAPACITY));
        let bytes = (new_cap - cap)
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| {
                DbError::new("Arena capacity overflow")
                    .with_field("capacity", new_cap)
                    .with_field("element_size", std::mem::size_of::<T>())
            })?;

        let mut reservation = self.reservation.manager().try_reserve(bytes)?;
        if let Err(e) = self.values.try_reserve_exact(new_cap - self.values.len()) {
            reservation.free();
            return Err(DbError::with_source("Failed to allocate arena", Box::new(e))
                .with_field("capacity", new_cap));
        }
        self.reservation.merge(reservation);

        Ok(())
    }

    /// Push a value, returning its index.
    pub fn push(&mut self, value: T) -> Result<usize> {
        self.reserve_for_size(self.values.len() + 1)?;
        let idx = self.values.len();
        self.values.push(value);
        Ok(idx)
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.values.get(idx)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }

    /// Drop all values and release the reservation.
    pub fn free(&mut self) {
        self.values = Vec::new();
        self.reservation.free();
    }
}

/// Append-only byte storage reserved through a buffer manager.
///
/// Bytes are addressed by offset. Only the most recently appended bytes can be
/// removed.
#[derive(Debug)]
pub struct ByteArena<B: BufferManager> {
    data: Vec<u8>,
    reservation: Reservation<B>,
}

impl<B> ByteArena<B>
where
    B: BufferManager,
{
    pub fn new(manager: &B) -> Self {
        ByteArena {
            data: Vec::new(),
            reservation: Reservation::empty(manager),
        }
    }

    /// Number of bytes written to the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes reserved for this arena.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    fn reserve_for_size(&mut self, size: usize) -> Result<()> {
        let cap = self.data.capacity();
        if size <= cap {
            return Ok(());
        }

        let new_cap = usize::max(size, usize::max(cap.saturating_mul(2), MIN_CAPACITY));
        let mut reservation = self.reservation.manager().try_reserve(new_cap - cap)?;
        if let Err(e) = self.data.try_reserve_exact(new_cap - self.data.len()) {
            reservation.free();
            return Err(DbError::with_source("Failed to allocate byte arena", Box::new(e))
                .with_field("capacity", new_cap));
        }
        self.reservation.merge(reservation);

        Ok(())
    }

    /// Append bytes, returning the offset they were written to.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        self.reserve_for_size(self.data.len() + bytes.len())?;
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Append bytes produced by a writer function directly into the arena.
    ///
    /// Returns the offset and length of the written bytes. If the writer or the
    /// reservation fails, the arena is left unchanged.
    pub fn append_with<F>(&mut self, write_fn: F) -> Result<(usize, usize)>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let offset = self.data.len();
        let cap = self.data.capacity();

        if let Err(e) = write_fn(&mut self.data) {
            self.data.truncate(offset);
            self.data.shrink_to(cap);
            return Err(e);
        }

        // Account for any growth that happened while writing.
        let new_cap = self.data.capacity();
        if new_cap > cap {
            if let Err(e) = self.reservation.grow(new_cap - cap) {
                self.data.truncate(offset);
                self.data.shrink_to(cap);
                return Err(e);
            }
        }

        Ok((offset, self.data.len() - offset))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get bytes at some offset.
    pub fn get(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..(offset + len))
    }

    /// Remove the `len` bytes at `offset`.
    ///
    /// The bytes must be the last bytes appended.
    pub fn remove_last(&mut self, offset: usize, len: usize) -> Result<()> {
        if offset + len != self.data.len() {
            return Err(DbError::new("Only the last appended bytes can be removed")
                .with_field("offset", offset)
                .with_field("len", len)
                .with_field("arena_len", self.data.len()));
        }
        self.data.truncate(offset);
        Ok(())
    }

    /// Drop all bytes and release the reservation.
    pub fn free(&mut self) {
        self.data = Vec::new();
        self.reservation.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::{NopBufferManager, TrackedBufferManager};

    #[test]
    fn arena_vec_push_get() {
        let mut vec = ArenaVec::new(&NopBufferManager);
        assert_eq!(0, vec.push(4_i64).unwrap());
        assert_eq!(1, vec.push(8).unwrap());

        assert_eq!(Some(&8), vec.get(1));
        assert_eq!(&[4, 8], vec.as_slice());
    }

    #[test]
    fn arena_vec_reserves_through_manager() {
        let manager = TrackedBufferManager::unlimited();
        let mut vec = ArenaVec::<u64, _>::try_with_capacity(&manager, 16).unwrap();
        assert_eq!(16 * 8, manager.used_bytes());

        for i in 0..17 {
            vec.push(i).unwrap();
        }
        assert_eq!(32 * 8, manager.used_bytes());
        assert_eq!(vec.reserved_bytes(), manager.used_bytes());

        vec.free();
        assert_eq!(0, manager.used_bytes());
        assert!(vec.is_empty());
    }

    #[test]
    fn arena_vec_limit_exceeded() {
        let manager = TrackedBufferManager::new(Some(64));
        let mut vec = ArenaVec::<u64, _>::new(&manager);
        for i in 0..8 {
            vec.push(i).unwrap();
        }
        vec.push(8).unwrap_err();
        assert_eq!(8, vec.len());
    }

    #[test]
    fn arena_vec_capacity_overflow() {
        let manager = TrackedBufferManager::unlimited();
        let mut vec = ArenaVec::<u64, _>::new(&manager);
        vec.reserve_for_size(usize::MAX / 4).unwrap_err();
        vec.reserve_for_size(usize::MAX).unwrap_err();
        assert_eq!(0, manager.used_bytes());
        assert_eq!(0, vec.capacity());

        // Accounted for but the allocation itself fails.
        ArenaVec::<u64, _>::try_with_capacity(&NopBufferManager, usize::MAX / 8).unwrap_err();
    }

    #[test]
    fn arena_vec_failed_reserve_keeps_contents() {
        let manager = TrackedBufferManager::new(Some(1024));
        let mut vec = ArenaVec::<u64, _>::try_with_capacity(&manager, 8).unwrap();
        vec.push(1).unwrap();
        vec.reserve_for_size(1 << 20).unwrap_err();

        assert_eq!(&[1], vec.as_slice());
        assert_eq!(64, manager.used_bytes());
        assert_eq!(vec.reserved_bytes(), manager.used_bytes());
    }

    #[test]
    fn byte_arena_append_remove_last() {
        let mut arena = ByteArena::new(&NopBufferManager);
        let a = arena.append(b"hello").unwrap();
        let b = arena.append(b"world").unwrap();
        assert_eq!(0, a);
        assert_eq!(5, b);
        assert_eq!(Some(&b"world"[..]), arena.get(b, 5));

        // Can't remove something that isn't last.
        arena.remove_last(a, 5).unwrap_err();

        arena.remove_last(b, 5).unwrap();
        assert_eq!(5, arena.len());
        assert_eq!(None, arena.get(b, 5));
    }

    #[test]
    fn byte_arena_append_with() {
        let manager = TrackedBufferManager::unlimited();
        let mut arena = ByteArena::new(&manager);
        arena.append(b"abc").unwrap();

        let (offset, len) = arena
            .append_with(|buf| {
                buf.extend_from_slice(&[1; 100]);
                Ok(())
            })
            .unwrap();
        assert_eq!(3, offset);
        assert_eq!(100, len);
        assert!(manager.used_bytes() >= 103);

        // Failed writes leave the arena as it was.
        arena
            .append_with(|buf| {
                buf.push(9);
                Err(DbError::new("encode failed"))
            })
            .unwrap_err();
        assert_eq!(103, arena.len());

        arena.free();
        assert_eq!(0, manager.used_bytes());
    }
}
