use setagg_error::{DbError, Result, ensure};
use tracing::trace;

use super::content::{ContentHandle, ContentStore};
use super::ordered_set::OrderedSet;
use super::{
    NO_NULL_INDEX,
    SIZE_OF_COUNT,
    SIZE_OF_HASH,
    SIZE_OF_INDEX,
    SetAccumulator,
    check_input_row,
    check_output_len,
    write_serialized,
};
use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::buffer::buffer_manager::BufferManager;
use crate::stream::{ByteReader, ByteWriter};

/// Per-value overhead in serialized state, ordinal, length and hash.
const SIZE_OF_TUPLE_HEADER: usize = SIZE_OF_INDEX + std::mem::size_of::<i32>() + SIZE_OF_HASH;

/// Set accumulator for list, map and struct values.
///
/// Values are encoded into a content store and deduplicated on their encoded
/// bytes. A value is always appended to the store before checking membership,
/// and the append is rolled back if the value turns out to be a duplicate.
#[derive(Debug)]
pub struct ComplexSetAccumulator<B: BufferManager> {
    set: OrderedSet<ContentHandle, B>,
    content: ContentStore<B>,
    /// Running size of the serialized state.
    serialized_bytes: usize,
}

impl<B> ComplexSetAccumulator<B>
where
    B: BufferManager,
{
    pub fn new(datatype: DataType, manager: &B) -> Self {
        ComplexSetAccumulator {
            set: OrderedSet::new(manager),
            content: ContentStore::new(datatype, manager),
            serialized_bytes: SIZE_OF_INDEX + SIZE_OF_COUNT,
        }
    }

    pub fn try_with_capacity(datatype: DataType, manager: &B, capacity: usize) -> Result<Self> {
        Ok(ComplexSetAccumulator {
            set: OrderedSet::try_with_capacity(manager, capacity)?,
            content: ContentStore::new(datatype, manager),
            serialized_bytes: SIZE_OF_INDEX + SIZE_OF_COUNT,
        })
    }

    pub fn datatype(&self) -> &DataType {
        self.content.datatype()
    }

    /// Number of bytes written to the content store.
    pub fn content_store_len(&self) -> usize {
        self.content.len()
    }

    /// Get the ordinal of the value at `row` in `input` if it's in the set.
    ///
    /// Temporarily appends the value to the content store.
    pub fn ordinal_of(&mut self, input: &Array, row: usize) -> Result<Option<i32>> {
        self.check_input_datatype(input)?;
        let handle = self.content.append(input, row)?;
        let content = &self.content;
        let ordinal = self
            .set
            .find(handle.hash, |k| content.equals(k, &handle))
            .map(|ent| ent.ordinal);
        self.content.remove_last(&handle)?;
        Ok(ordinal)
    }

    fn check_input_datatype(&self, input: &Array) -> Result<()> {
        if input.datatype() != self.content.datatype() {
            return Err(DbError::new("Input datatype does not match set accumulator")
                .with_field("expected", self.content.datatype())
                .with_field("actual", input.datatype()));
        }
        Ok(())
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<()> {
        let mut writer = ByteWriter::new(buf);
        writer.write_i32(self.set.null_index_serialization_value())?;
        writer.write_usize(self.set.num_values())?;

        for ent in self.set.iter() {
            writer.write_i32(ent.ordinal)?;
            writer.write_i32(i32::try_from(ent.key.size)?)?;
            writer.write_u64(ent.key.hash)?;
            self.content
                .read_serialized(&ent.key, writer.next_slice_mut(ent.key.size)?)?;
        }

        writer.finish()
    }
}

impl<B> SetAccumulator for ComplexSetAccumulator<B>
where
    B: BufferManager,
{
    fn add_value(&mut self, input: &Array, row: usize) -> Result<()> {
        check_input_row(input, row)?;
        self.check_input_datatype(input)?;
        if !input.is_valid(row) {
            return self.set.add_null();
        }

        let handle = self.content.append(input, row)?;
        let content = &self.content;
        let inserted = self
            .set
            .try_insert(handle.hash, handle, |k| content.equals(k, &handle));

        match inserted {
            Ok(true) => {
                self.serialized_bytes += SIZE_OF_TUPLE_HEADER + handle.size;
                Ok(())
            }
            Ok(false) => self.content.remove_last(&handle),
            Err(e) => {
                self.content.remove_last(&handle)?;
                Err(e)
            }
        }
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

        for ent in self.set.iter() {
            self.content
                .read(&ent.key, output, offset + ent.ordinal as usize)?;
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
            "serialized complex set"
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
            let size = usize::try_from(reader.read_i32()?)?;
            let hash = reader.read_u64()?;
            let value = reader.read_bytes(size)?;

            let handle = self.content.append_serialized(value, hash)?;
            let content = &self.content;
            self.set
                .insert_deserialized(hash, handle, ordinal, |k| content.equals(k, &handle))?;
            self.serialized_bytes += SIZE_OF_TUPLE_HEADER + size;
        }

        ensure!(
            self.set.num_values() == count,
            "Serialized complex set count mismatch, expected: {count}, read: {}",
            self.set.num_values()
        );
        self.set.validate_ordinals()?;

        trace!(
            count,
            bytes = bytes.len(),
            has_null = self.set.has_null(),
            "deserialized complex set"
        );

        Ok(())
    }

    fn free(&mut self) {
        trace!(
            reserved = self.set.reserved_bytes() + self.content.reserved_bytes(),
            "freeing complex set"
        );
        self.set.free();
        self.content.free();
        self.serialized_bytes = SIZE_OF_INDEX + SIZE_OF_COUNT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::scalar::ScalarValue;
    use crate::buffer::buffer_manager::{NopBufferManager, TrackedBufferManager};
    use crate::testutil::{extract_all, serialize_to_bytes};

    fn int_list(values: &[i32]) -> ScalarValue {
        ScalarValue::List(values.iter().map(|v| ScalarValue::Int32(*v)).collect())
    }

    fn build(
        datatype: &DataType,
        values: Vec<ScalarValue>,
    ) -> ComplexSetAccumulator<NopBufferManager> {
        let input = Array::try_from_scalars(datatype, values).unwrap();
        let mut acc = ComplexSetAccumulator::new(datatype.clone(), &NopBufferManager);
        for row in 0..input.len() {
            acc.add_value(&input, row).unwrap();
        }
        acc
    }

    #[test]
    fn lists_with_null() {
        let datatype = DataType::list(DataType::Int32);
        let acc = build(
            &datatype,
            vec![
                int_list(&[1, 2]),
                ScalarValue::Null,
                int_list(&[]),
                int_list(&[1, 2]),
                int_list(&[2, 1]),
            ],
        );

        assert_eq!(4, acc.size());
        assert_eq!(Some(1), acc.null_index());

        let out = extract_all(&acc, &datatype);
        assert_eq!(
            vec![
                int_list(&[1, 2]),
                ScalarValue::Null,
                int_list(&[]),
                int_list(&[2, 1]),
            ],
            out
        );
    }

    #[test]
    fn duplicate_rolls_back_content() {
        let datatype = DataType::list(DataType::Int32);
        let input = Array::try_from_scalars(
            &datatype,
            [int_list(&[4, 5, 6]), int_list(&[4, 5, 6])],
        )
        .unwrap();

        let mut acc = ComplexSetAccumulator::new(datatype, &NopBufferManager);
        acc.add_value(&input, 0).unwrap();
        let len = acc.content_store_len();
        let serialized = acc.serialized_size();

        acc.add_value(&input, 1).unwrap();
        assert_eq!(len, acc.content_store_len());
        assert_eq!(serialized, acc.serialized_size());
        assert_eq!(1, acc.size());
    }

    #[test]
    fn structs_with_null_fields() {
        let datatype = DataType::structure([("a", DataType::Utf8), ("b", DataType::Int64)]);
        let acc = build(
            &datatype,
            vec![
                ScalarValue::Struct(vec!["x".into(), ScalarValue::Null]),
                ScalarValue::Struct(vec!["x".into(), ScalarValue::Int64(0)]),
                ScalarValue::Struct(vec!["x".into(), ScalarValue::Null]),
            ],
        );
        assert_eq!(2, acc.size());
        assert_eq!(None, acc.null_index());
    }

    #[test]
    fn ordinal_lookup_leaves_store_unchanged() {
        let datatype = DataType::list(DataType::Int32);
        let mut acc = build(&datatype, vec![int_list(&[1]), int_list(&[2])]);
        let lookup = Array::try_from_scalars(&datatype, [int_list(&[2]), int_list(&[3])]).unwrap();

        let len = acc.content_store_len();
        assert_eq!(Some(1), acc.ordinal_of(&lookup, 0).unwrap());
        assert_eq!(None, acc.ordinal_of(&lookup, 1).unwrap());
        assert_eq!(len, acc.content_store_len());
    }

    #[test]
    fn roundtrip() {
        let datatype = DataType::list(DataType::list(DataType::Utf8));
        let values = vec![
            ScalarValue::List(vec![ScalarValue::List(vec!["a".into(), ScalarValue::Null])]),
            ScalarValue::Null,
            ScalarValue::List(vec![]),
            ScalarValue::List(vec![ScalarValue::Null]),
        ];
        let acc = build(&datatype, values.clone());
        let bytes = serialize_to_bytes(&acc);
        assert_eq!(acc.serialized_size(), bytes.len());

        let mut restored = ComplexSetAccumulator::new(datatype.clone(), &NopBufferManager);
        restored.deserialize(&bytes).unwrap();

        assert_eq!(4, restored.size());
        assert_eq!(Some(1), restored.null_index());
        assert_eq!(values, extract_all(&restored, &datatype));
        assert_eq!(bytes, serialize_to_bytes(&restored));
    }

    #[test]
    fn deserialize_keeps_carried_hash() {
        let datatype = DataType::list(DataType::Int32);
        let acc = build(&datatype, vec![int_list(&[1]), int_list(&[2])]);
        let mut bytes = serialize_to_bytes(&acc);

        // Hash of the first tuple, after ordinal and length.
        let hash_offset = SIZE_OF_INDEX + SIZE_OF_COUNT + 8;
        bytes[hash_offset] ^= 1;

        let mut restored = ComplexSetAccumulator::new(datatype.clone(), &NopBufferManager);
        restored.deserialize(&bytes).unwrap();

        assert_eq!(2, restored.size());
        assert_eq!(vec![int_list(&[1]), int_list(&[2])], extract_all(&restored, &datatype));
        assert_eq!(bytes, serialize_to_bytes(&restored));
    }

    #[test]
    fn input_datatype_mismatch() {
        let datatype = DataType::structure([("a", DataType::Int32), ("b", DataType::Int32)]);
        let other = DataType::structure([("a", DataType::Int64)]);
        let input =
            Array::try_from_scalars(&other, [ScalarValue::Struct(vec![ScalarValue::Int64(1)])])
                .unwrap();

        let mut acc = ComplexSetAccumulator::new(datatype.clone(), &NopBufferManager);
        acc.add_value(&input, 0).unwrap_err();
        assert_eq!(0, acc.size());
        assert_eq!(0, acc.content_store_len());

        // Rejected even when the row is null.
        let nulls = Array::try_from_scalars(&other, [ScalarValue::Null]).unwrap();
        acc.add_value(&nulls, 0).unwrap_err();
        assert_eq!(None, acc.null_index());
    }

    #[test]
    fn maps_dedup_and_roundtrip() {
        let datatype = DataType::map(DataType::Utf8, DataType::Int64);
        let first = ScalarValue::Map(vec![
            ("a".into(), ScalarValue::Int64(1)),
            ("b".into(), ScalarValue::Null),
        ]);
        let reordered = ScalarValue::Map(vec![
            ("b".into(), ScalarValue::Null),
            ("a".into(), ScalarValue::Int64(1)),
        ]);
        let acc = build(
            &datatype,
            vec![
                first.clone(),
                ScalarValue::Map(Vec::new()),
                first.clone(),
                ScalarValue::Null,
                reordered.clone(),
            ],
        );

        assert_eq!(4, acc.size());
        assert_eq!(Some(2), acc.null_index());
        let expected = vec![
            first,
            ScalarValue::Map(Vec::new()),
            ScalarValue::Null,
            reordered,
        ];
        assert_eq!(expected, extract_all(&acc, &datatype));

        let bytes = serialize_to_bytes(&acc);
        let mut restored = ComplexSetAccumulator::new(datatype.clone(), &NopBufferManager);
        restored.deserialize(&bytes).unwrap();
        assert_eq!(expected, extract_all(&restored, &datatype));
        assert_eq!(bytes, serialize_to_bytes(&restored));
    }

    #[test]
    fn deserialize_count_mismatch() {
        let datatype = DataType::list(DataType::Int32);
        let acc = build(&datatype, vec![int_list(&[1]), int_list(&[2])]);
        let mut bytes = serialize_to_bytes(&acc);
        bytes[SIZE_OF_INDEX..SIZE_OF_INDEX + SIZE_OF_COUNT].copy_from_slice(&1_usize.to_ne_bytes());

        let mut restored = ComplexSetAccumulator::new(datatype, &NopBufferManager);
        restored.deserialize(&bytes).unwrap_err();
    }

    #[test]
    fn free_returns_memory() {
        let manager = TrackedBufferManager::unlimited();
        let datatype = DataType::list(DataType::Int32);
        let input =
            Array::try_from_scalars(&datatype, (0..100).map(|i| int_list(&[i, i + 1]))).unwrap();

        let mut acc = ComplexSetAccumulator::new(datatype, &manager);
        for row in 0..input.len() {
            acc.add_value(&input, row).unwrap();
        }
        assert_eq!(100, acc.size());
        assert!(manager.used_bytes() > 0);

        acc.free();
        assert_eq!(0, manager.used_bytes());
        assert_eq!(0, acc.content_store_len());
    }
}
