use std::marker::PhantomData;

use setagg_error::{Result, ensure};
use tracing::trace;

use super::ordered_set::OrderedSet;
use super::{
    NO_NULL_INDEX,
    SIZE_OF_COUNT,
    SIZE_OF_INDEX,
    SetAccumulator,
    check_input_row,
    check_output_len,
    write_serialized,
};
use crate::arrays::array::Array;
use crate::arrays::physical_type::{FixedWidthValue, PhysicalStorage};
use crate::buffer::buffer_manager::BufferManager;
use crate::stream::{ByteReader, ByteWriter};

/// Set accumulator for fixed width values.
///
/// Values are copied into the set. Serialized state is a header followed by
/// one fixed width slot per value, with slots ordered by ordinal skipping over
/// the null.
#[derive(Debug)]
pub struct ScalarSetAccumulator<S: PhysicalStorage, B: BufferManager> {
    set: OrderedSet<S::StorageType, B>,
    _storage: PhantomData<S>,
}

impl<S, B> ScalarSetAccumulator<S, B>
where
    S: PhysicalStorage,
    B: BufferManager,
{
    pub fn new(manager: &B) -> Self {
        ScalarSetAccumulator {
            set: OrderedSet::new(manager),
            _storage: PhantomData,
        }
    }

    pub fn try_with_capacity(manager: &B, capacity: usize) -> Result<Self> {
        Ok(ScalarSetAccumulator {
            set: OrderedSet::try_with_capacity(manager, capacity)?,
            _storage: PhantomData,
        })
    }

    /// Get the ordinal for a value if it's in the set.
    pub fn ordinal_of(&self, value: &S::StorageType) -> Option<i32> {
        self.set
            .find(value.set_hash(), |k| k.set_eq(value))
            .map(|ent| ent.ordinal)
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<()> {
        let count = self.set.num_values();
        let null_position = match self.set.null_index() {
            Some(idx) => idx as usize,
            None => count,
        };

        let mut writer = ByteWriter::new(buf);
        writer.write_i32(self.set.null_index_serialization_value())?;
        writer.write_usize(count)?;

        let header = SIZE_OF_INDEX + SIZE_OF_COUNT;
        for ent in self.set.iter() {
            let ordinal = ent.ordinal as usize;
            let slot = if ordinal < null_position {
                ordinal
            } else {
                ordinal - 1
            };
            writer.write_value_at(header + slot * S::StorageType::WIDTH, &ent.key)?;
        }

        writer.finish()
    }
}

impl<S, B> SetAccumulator for ScalarSetAccumulator<S, B>
where
    S: PhysicalStorage,
    B: BufferManager,
{
    fn add_value(&mut self, input: &Array, row: usize) -> Result<()> {
        check_input_row(input, row)?;
        if !input.is_valid(row) {
            return self.set.add_null();
        }

        let value = S::get_slice(input.data())?[row];
        self.set
            .try_insert(value.set_hash(), value, |k| k.set_eq(&value))?;

        Ok(())
    }

    fn size(&self) -> usize {
        self.set.size()
    }

    fn null_index(&self) -> Option<i32> {
        self.set.null_index()
    }

    fn extract_values(&self, output: &mut Array, offset: usize) -> Result<usize> {
        let size = self.set.size();
        check_output_len(output, offset, size)?;

        let values = S::get_slice_mut(output.data_mut())?;
        for ent in self.set.iter() {
            values[offset + ent.ordinal as usize] = ent.key;
        }

        for ent in self.set.iter() {
            output.set_valid(offset + ent.ordinal as usize)?;
        }
        if let Some(null_idx) = self.set.null_index() {
            output.set_null(offset + null_idx as usize)?;
        }

        Ok(size)
    }

    fn serialized_size(&self) -> usize {
        SIZE_OF_INDEX + SIZE_OF_COUNT + self.set.num_values() * S::StorageType::WIDTH
    }

    fn serialize(&self, output: &mut Array, idx: usize) -> Result<()> {
        let size = self.serialized_size();
        write_serialized(output, idx, size, |buf| self.serialize_into(buf))?;
        trace!(
            count = self.set.num_values(),
            bytes = size,
            has_null = self.set.has_null(),
            "serialized scalar set"
        );
        Ok(())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(
            self.set.is_empty(),
            "Cannot deserialize into a non-empty set accumulator"
        );

        let mut reader = ByteReader::new(bytes);
        let null_index = reader.read_i32()?;
        let count = reader.read_usize()?;

        let expected = count
            .checked_mul(S::StorageType::WIDTH)
            .and_then(|n| n.checked_add(SIZE_OF_INDEX + SIZE_OF_COUNT));
        ensure!(
            expected == Some(bytes.len()),
            "Serialized scalar set size mismatch, count: {count}, bytes: {}",
            bytes.len()
        );

        if null_index != NO_NULL_INDEX {
            self.set.set_null_index(null_index)?;
        }

        let total = count + self.set.has_null() as usize;
        for ordinal in 0..total {
            let ordinal = i32::try_from(ordinal)?;
            if Some(ordinal) == self.set.null_index() {
                continue;
            }
            let value = reader.read_value::<S::StorageType>()?;
            self.set
                .insert_deserialized(value.set_hash(), value, ordinal, |k| k.set_eq(&value))?;
        }

        ensure!(
            reader.is_exhausted(),
            "Trailing bytes in serialized scalar set: {}",
            reader.remaining()
        );
        self.set.validate_ordinals()?;

        trace!(
            count,
            bytes = bytes.len(),
            has_null = self.set.has_null(),
            "deserialized scalar set"
        );

        Ok(())
    }

    fn free(&mut self) {
        trace!(reserved = self.set.reserved_bytes(), "freeing scalar set");
        self.set.free();
    }
}
