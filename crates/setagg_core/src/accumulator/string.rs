use setagg_error::{DbError, Result, ensure};
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
use crate::arrays::string::StringView;
use crate::buffer::arena::ByteArena;
use crate::buffer::buffer_manager::BufferManager;
use crate::hash::hash_bytes;
use crate::stream::{ByteReader, ByteWriter};

/// Per-value overhead in serialized state, ordinal and length.
const SIZE_OF_TUPLE_HEADER: usize = SIZE_OF_INDEX + std::mem::size_of::<i32>();

/// Set accumulator for utf8 and binary values.
///
/// Short values are inlined in the view. Longer values are copied into a byte
/// arena owned by the accumulator, and only copied once the value is known to
/// be new to the set.
#[derive(Debug)]
pub struct StringSetAccumulator<B: BufferManager> {
    set: OrderedSet<StringView, B>,
    strings: ByteArena<B>,
    /// Running size of the serialized state.
    serialized_bytes: usize,
}

impl<B> StringSetAccumulator<B>
where
    B: BufferManager,
{
    pub fn new(manager: &B) -> Self {
        StringSetAccumulator {
            set: OrderedSet::new(manager),
            strings: ByteArena::new(manager),
            serialized_bytes: SIZE_OF_INDEX + SIZE_OF_COUNT,
        }
    }

    pub fn try_with_capacity(manager: &B, capacity: usize) -> Result<Self> {
        Ok(StringSetAccumulator {
            set: OrderedSet::try_with_capacity(manager, capacity)?,
            strings: ByteArena::new(manager),
            serialized_bytes: SIZE_OF_INDEX + SIZE_OF_COUNT,
        })
    }

    /// Get the ordinal for a value if it's in the set.
    pub fn ordinal_of(&self, bytes: &[u8]) -> Option<i32> {
        let heap = self.strings.as_slice();
        self.set
            .find(hash_bytes(bytes), |view| view.get_bytes(heap) == Some(bytes))
            .map(|ent| ent.ordinal)
    }

    /// Number of bytes written to the string store.
    pub fn string_store_len(&self) -> usize {
        self.strings.len()
    }

    /// Get a view for bytes, copying the bytes into the string store if they
    /// can't be inlined.
    fn store_view(&mut self, bytes: &[u8]) -> Result<StringView> {
        if let Some(view) = StringView::try_new_inline(bytes) {
            return Ok(view);
        }
        let view = StringView::try_new_heap(bytes, self.strings.len())?;
        self.strings.append(bytes)?;
        Ok(view)
    }

    fn insert_with_ordinal(&mut self, hash: u64, bytes: &[u8], ordinal: i32) -> Result<()> {
        let view = self.store_view(bytes)?;
        self.set.insert_new(hash, view, ordinal)?;
        self.serialized_bytes += SIZE_OF_TUPLE_HEADER + bytes.len();
        Ok(())
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<()> {
        let heap = self.strings.as_slice();

        let mut writer = ByteWriter::new(buf);
        writer.write_i32(self.set.null_index_serialization_value())?;
        writer.write_usize(self.set.num_values())?;

        for ent in self.set.iter() {
            let bytes = ent.key.get_bytes(heap).ok_or_else(|| {
                DbError::new("Missing bytes in string store").with_field("ordinal", ent.ordinal)
            })?;
            writer.write_i32(ent.ordinal)?;
            writer.write_i32(i32::try_from(bytes.len())?)?;
            writer.write_bytes(bytes)?;
        }

        writer.finish()
    }
}

impl<B> SetAccumulator for StringSetAccumulator<B>
where
    B: BufferManager,
{
    fn add_value(&mut self, input: &Array, row: usize) -> Result<()> {
        check_input_row(input, row)?;
        if !input.is_valid(row) {
            return self.set.add_null();
        }

        let bytes = input.get_bytes(row)?;
        let hash = hash_bytes(bytes);

        let heap = self.strings.as_slice();
        if self
            .set
            .find(hash, |view| view.get_bytes(heap) == Some(bytes))
            .is_some()
        {
            return Ok(());
        }

        let ordinal = self.set.next_ordinal()?;
        self.insert_with_ordinal(hash, bytes, ordinal)
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

        let heap = self.strings.as_slice();
        let strings = output.string_buffer_mut()?;
        for ent in self.set.iter() {
            let bytes = ent.key.get_bytes(heap).ok_or_else(|| {
                DbError::new("Missing bytes in string store").with_field("ordinal", ent.ordinal)
            })?;
            strings.put(offset + ent.ordinal as usize, bytes)?;
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
        self.serialized_bytes
    }

    fn serialize(&self, output: &mut Array, idx: usize) -> Result<()> {
        write_serialized(output, idx, self.serialized_bytes, |buf| {
            self.serialize_into(buf)
        })?;
        trace!(
            count = self.set.num_values(),
            bytes = self.serialized_bytes,
            has_null = self.set.has_null(),
            "serialized string set"
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

        if null_index != NO_NULL_INDEX {
            self.set.set_null_index(null_index)?;
        }

        while !reader.is_exhausted() {
            let ordinal = reader.read_i32()?;
            let len = usize::try_from(reader.read_i32()?)?;
            let value = reader.read_bytes(len)?;
            let hash = hash_bytes(value);

            let heap = self.strings.as_slice();
            if self
                .set
                .find(hash, |view| view.get_bytes(heap) == Some(value))
                .is_some()
            {
                return Err(DbError::new("Duplicate value in serialized string set")
                    .with_field("ordinal", ordinal));
            }

            self.insert_with_ordinal(hash, value, ordinal)?;
        }

        ensure!(
            self.set.num_values() == count,
            "Serialized string set count mismatch, expected: {count}, read: {}",
            self.set.num_values()
        );
        self.set.validate_ordinals()?;

        trace!(
            count,
            bytes = bytes.len(),
            has_null = self.set.has_null(),
            "deserialized string set"
        );

        Ok(())
    }

    fn free(&mut self) {
        trace!(
            reserved = self.set.reserved_bytes() + self.strings.reserved_bytes(),
            "freeing string set"
        );
        self.set.free();
        self.strings.free();
        self.serialized_bytes = SIZE_OF_INDEX + SIZE_OF_COUNT;
    }
}
