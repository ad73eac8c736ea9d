use std::fmt;

use hashbrown::raw::RawTable;
use setagg_error::{DbError, Result};

use super::NO_NULL_INDEX;
use crate::arrays::validity::Bitmap;
use crate::buffer::arena::ArenaVec;
use crate::buffer::buffer_manager::{BufferManager, Reservation};

/// Approximate bytes used per bucket in the index table, including the control
/// byte.
const TABLE_BUCKET_SIZE: usize = std::mem::size_of::<(u64, usize)>() + 1;

/// A distinct value tracked by the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEntry<K> {
    pub key: K,
    pub hash: u64,
    /// Position of the value in the order values were first seen.
    pub ordinal: i32,
}

/// Insertion ordered set of distinct values with an optional null.
///
/// Entries are stored in an arena vec in insertion order, and the hash table
/// only holds `(hash, entry_idx)` pairs. Key equality is provided by the caller
/// since keys may only be comparable against some external storage (string
/// views into a byte arena, handles into a content store).
///
/// Ordinals are assigned from a single counter shared between values and the
/// null, so the ordinals of all members are exactly `0..size()`.
pub struct OrderedSet<K, B: BufferManager> {
    null_index: Option<i32>,
    entries: ArenaVec<SetEntry<K>, B>,
    table: RawTable<(u64, usize)>,
    table_reservation: Reservation<B>,
}

impl<K, B> OrderedSet<K, B>
where
    B: BufferManager,
{
    pub fn new(manager: &B) -> Self {
        OrderedSet {
            null_index: None,
            entries: ArenaVec::new(manager),
            table: RawTable::new(),
            table_reservation: Reservation::empty(manager),
        }
    }

    pub fn try_with_capacity(manager: &B, capacity: usize) -> Result<Self> {
        let mut set = OrderedSet {
            null_index: None,
            entries: ArenaVec::try_with_capacity(manager, capacity)?,
            table: RawTable::new(),
            table_reservation: Reservation::empty(manager),
        };
        if let Err(e) = set.reserve_table(capacity) {
            set.free();
            return Err(e);
        }
        Ok(set)
    }

    /// Number of members including the null.
    pub fn size(&self) -> usize {
        self.entries.len() + self.has_null() as usize
    }

    /// Number of non-null values.
    pub fn num_values(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn null_index(&self) -> Option<i32> {
        self.null_index
    }

    pub fn has_null(&self) -> bool {
        self.null_index.is_some()
    }

    /// Null index as written to serialized state.
    pub fn null_index_serialization_value(&self) -> i32 {
        self.null_index.unwrap_or(NO_NULL_INDEX)
    }

    /// Ordinal to assign to the next new member.
    pub fn next_ordinal(&self) -> Result<i32> {
        i32::try_from(self.size())
            .map_err(|_| DbError::new("Too many values in set").with_field("size", self.size()))
    }

    /// Accept a null. Only the first null gets an ordinal.
    pub fn add_null(&mut self) -> Result<()> {
        if self.null_index.is_none() {
            self.null_index = Some(self.next_ordinal()?);
        }
        Ok(())
    }

    /// Set the null index read from serialized state.
    pub fn set_null_index(&mut self, null_index: i32) -> Result<()> {
        if let Some(existing) = self.null_index {
            return Err(DbError::new("Null index already set")
                .with_field("existing", existing)
                .with_field("new", null_index));
        }
        if null_index < 0 {
            return Err(DbError::new("Invalid null index").with_field("null_index", null_index));
        }
        self.null_index = Some(null_index);
        Ok(())
    }

    /// Find the entry for a key with the given hash.
    pub fn find(&self, hash: u64, eq: impl Fn(&K) -> bool) -> Option<&SetEntry<K>> {
        let entries = self.entries.as_slice();
        let (_, idx) = self
            .table
            .get(hash, |(h, idx)| *h == hash && eq(&entries[*idx].key))?;
        entries.get(*idx)
    }

    /// Insert a key if it's not already in the set, assigning it the next
    /// ordinal.
    ///
    /// Returns false if an equal key already exists.
    pub fn try_insert(&mut self, hash: u64, key: K, eq: impl Fn(&K) -> bool) -> Result<bool> {
        if self.find(hash, eq).is_some() {
            return Ok(false);
        }
        let ordinal = self.next_ordinal()?;
        self.insert_new(hash, key, ordinal)?;
        Ok(true)
    }

    /// Insert a key with a known ordinal without checking for duplicates.
    ///
    /// Used when rehydrating from serialized state where uniqueness was
    /// already established. `validate_ordinals` should be called once all
    /// entries are inserted.
    pub fn insert_new(&mut self, hash: u64, key: K, ordinal: i32) -> Result<()> {
        self.reserve_table(1)?;
        let idx = self.entries.push(SetEntry { key, hash, ordinal })?;
        self.table.insert(hash, (hash, idx), |(h, _)| *h);
        Ok(())
    }

    /// Insert a key with a known ordinal read from serialized state.
    ///
    /// Errors if an equal key is already in the set.
    pub fn insert_deserialized(
        &mut self,
        hash: u64,
        key: K,
        ordinal: i32,
        eq: impl Fn(&K) -> bool,
    ) -> Result<()> {
        if let Some(existing) = self.find(hash, eq) {
            return Err(DbError::new("Duplicate value in serialized set")
                .with_field("ordinal", ordinal)
                .with_field("existing_ordinal", existing.ordinal));
        }
        self.insert_new(hash, key, ordinal)
    }

    fn reserve_table(&mut self, additional: usize) -> Result<()> {
        let before = self.table.buckets();
        self.table
            .try_reserve(additional, |(h, _)| *h)
            .map_err(|e| {
                DbError::new("Failed to reserve set index")
                    .with_field("additional", additional)
                    .with_field("error", format!("{e:?}"))
            })?;
        let after = self.table.buckets();
        if after > before {
            self.table_reservation
                .grow((after - before) * TABLE_BUCKET_SIZE)?;
        }
        Ok(())
    }

    /// Check that the ordinals of all members are exactly `0..size()`.
    pub fn validate_ordinals(&self) -> Result<()> {
        let size = self.size();
        let mut seen = Bitmap::new_with_all_false(size);

        let ordinals = self
            .entries
            .iter()
            .map(|ent| ent.ordinal)
            .chain(self.null_index);

        for ordinal in ordinals {
            let idx = usize::try_from(ordinal)
                .ok()
                .filter(|&idx| idx < size)
                .ok_or_else(|| {
                    DbError::new("Ordinal out of range")
                        .with_field("ordinal", ordinal)
                        .with_field("size", size)
                })?;
            if seen.value(idx) {
                return Err(DbError::new("Duplicate ordinal").with_field("ordinal", ordinal));
            }
            seen.set_unchecked(idx, true);
        }

        Ok(())
    }

    /// Iterate all non-null entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SetEntry<K>> {
        self.entries.iter()
    }

    /// Number of bytes currently reserved by the set.
    pub fn reserved_bytes(&self) -> usize {
        self.entries.reserved_bytes() + self.table_reservation.size()
    }

    /// Release all storage. The set is empty afterwards.
    pub fn free(&mut self) {
        self.null_index = None;
        self.entries.free();
        self.table = RawTable::new();
        self.table_reservation.free();
    }
}

impl<K, B> fmt::Debug for OrderedSet<K, B>
where
    K: fmt::Debug,
    B: BufferManager,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedSet")
            .field("null_index", &self.null_index)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::{NopBufferManager, TrackedBufferManager};
    use crate::hash::hash_value;

    fn insert(set: &mut OrderedSet<i64, NopBufferManager>, v: i64) -> bool {
        set.try_insert(hash_value(&v), v, |k| *k == v).unwrap()
    }

    #[test]
    fn ordinals_interleave_with_null() {
        let mut set = OrderedSet::new(&NopBufferManager);
        assert!(insert(&mut set, 5));
        set.add_null().unwrap();
        assert!(insert(&mut set, 3));
        assert!(!insert(&mut set, 5));
        set.add_null().unwrap();

        assert_eq!(3, set.size());
        assert_eq!(2, set.num_values());
        assert_eq!(Some(1), set.null_index());

        let ordinals: Vec<_> = set.iter().map(|ent| (ent.key, ent.ordinal)).collect();
        assert_eq!(vec![(5, 0), (3, 2)], ordinals);
        set.validate_ordinals().unwrap();
    }

    #[test]
    fn find_existing() {
        let mut set = OrderedSet::new(&NopBufferManager);
        for v in [10, 20, 30] {
            insert(&mut set, v);
        }
        let ent = set.find(hash_value(&20_i64), |k| *k == 20).unwrap();
        assert_eq!(1, ent.ordinal);
        assert!(set.find(hash_value(&40_i64), |k| *k == 40).is_none());
    }

    #[test]
    fn set_null_index_twice() {
        let mut set = OrderedSet::<i64, _>::new(&NopBufferManager);
        set.set_null_index(0).unwrap();
        set.set_null_index(0).unwrap_err();
        assert_eq!(0, set.null_index_serialization_value());
    }

    #[test]
    fn validate_ordinals_gap() {
        let mut set = OrderedSet::new(&NopBufferManager);
        set.insert_new(hash_value(&1_i64), 1_i64, 0).unwrap();
        set.insert_new(hash_value(&2_i64), 2_i64, 2).unwrap();
        set.validate_ordinals().unwrap_err();
    }

    #[test]
    fn validate_ordinals_collides_with_null() {
        let mut set = OrderedSet::new(&NopBufferManager);
        set.set_null_index(0).unwrap();
        set.insert_new(hash_value(&1_i64), 1_i64, 0).unwrap();
        set.validate_ordinals().unwrap_err();
    }

    #[test]
    fn insert_deserialized_rejects_duplicate() {
        let mut set = OrderedSet::new(&NopBufferManager);
        set.insert_deserialized(hash_value(&4_i64), 4_i64, 0, |k| *k == 4)
            .unwrap();
        set.insert_deserialized(hash_value(&4_i64), 4_i64, 1, |k| *k == 4)
            .unwrap_err();
        assert_eq!(1, set.size());
    }

    #[test]
    fn free_releases_memory() {
        let manager = TrackedBufferManager::unlimited();
        let mut set = OrderedSet::try_with_capacity(&manager, 4).unwrap();
        for v in 0..100_i64 {
            set.try_insert(hash_value(&v), v, |k| *k == v).unwrap();
        }
        assert!(manager.used_bytes() > 0);
        assert_eq!(set.reserved_bytes(), manager.used_bytes());

        set.free();
        assert_eq!(0, manager.used_bytes());
        assert!(set.is_empty());

        // Freeing again is a no-op.
        set.free();
        assert_eq!(0, manager.used_bytes());
    }

    #[test]
    fn reserve_table_overflow() {
        let manager = TrackedBufferManager::unlimited();
        let mut set = OrderedSet::<i64, _>::try_with_capacity(&manager, 16).unwrap();
        let used = manager.used_bytes();

        set.reserve_table(usize::MAX).unwrap_err();
        assert_eq!(used, manager.used_bytes());

        set.try_insert(hash_value(&1_i64), 1, |k| *k == 1).unwrap();
        assert_eq!(1, set.size());
        set.free();
        assert_eq!(0, manager.used_bytes());
    }

    #[test]
    fn capacity_over_limit_releases_partial_reservation() {
        // Entries fit, the index table doesn't.
        let entry_bytes = 64 * std::mem::size_of::<SetEntry<i64>>();
        let manager = TrackedBufferManager::new(Some(entry_bytes + 16));

        OrderedSet::<i64, _>::try_with_capacity(&manager, 64).unwrap_err();
        assert_eq!(0, manager.used_bytes());
    }
}
