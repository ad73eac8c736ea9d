use setagg_error::{DbError, OptionExt, Result};

use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::arrays::nested::{decode_exact, encode_value};
use crate::buffer::arena::ByteArena;
use crate::buffer::buffer_manager::BufferManager;
use crate::hash::hash_bytes;

/// Handle to a value stored in a content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHandle {
    /// Offset of the encoded value in the store.
    pub position: usize,
    /// Size in bytes of the encoded value.
    pub size: usize,
    /// Hash of the encoded bytes.
    pub hash: u64,
}

/// Append-only storage of encoded nested values.
///
/// Values are compared by their encoded bytes. The hash in a handle is only
/// used to avoid comparing bytes that can't be equal.
#[derive(Debug)]
pub struct ContentStore<B: BufferManager> {
    datatype: DataType,
    bytes: ByteArena<B>,
}

impl<B> ContentStore<B>
where
    B: BufferManager,
{
    pub fn new(datatype: DataType, manager: &B) -> Self {
        ContentStore {
            datatype,
            bytes: ByteArena::new(manager),
        }
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    /// Total number of bytes in the store.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.bytes.reserved_bytes()
    }

    /// Encode the value at `row` and append it to the store.
    pub fn append(&mut self, array: &Array, row: usize) -> Result<ContentHandle> {
        let (position, size) = self
            .bytes
            .append_with(|buf| encode_value(array, row, buf))?;
        let encoded = self.bytes.get(position, size).required("encoded value")?;

        Ok(ContentHandle {
            position,
            size,
            hash: hash_bytes(encoded),
        })
    }

    /// Append already encoded bytes with a known hash.
    pub fn append_serialized(&mut self, bytes: &[u8], hash: u64) -> Result<ContentHandle> {
        let position = self.bytes.append(bytes)?;
        Ok(ContentHandle {
            position,
            size: bytes.len(),
            hash,
        })
    }

    /// Remove the most recently appended value.
    pub fn remove_last(&mut self, handle: &ContentHandle) -> Result<()> {
        self.bytes.remove_last(handle.position, handle.size)
    }

    /// Get the encoded bytes for a handle.
    pub fn get(&self, handle: &ContentHandle) -> Option<&[u8]> {
        self.bytes.get(handle.position, handle.size)
    }

    /// Check if two handles point to equal values.
    pub fn equals(&self, a: &ContentHandle, b: &ContentHandle) -> bool {
        a.hash == b.hash && a.size == b.size && self.get(a) == self.get(b)
    }

    /// Decode the value for a handle and write it to `output` at `idx`.
    pub fn read(&self, handle: &ContentHandle, output: &mut Array, idx: usize) -> Result<()> {
        let bytes = self.get(handle).required("content bytes")?;
        let value = decode_exact(&self.datatype, bytes)?;
        output.set_value(idx, &value)
    }

    /// Copy the encoded bytes for a handle into `buf`.
    ///
    /// `buf` must be exactly the size of the value.
    pub fn read_serialized(&self, handle: &ContentHandle, buf: &mut [u8]) -> Result<()> {
        let bytes = self.get(handle).required("content bytes")?;
        if bytes.len() != buf.len() {
            return Err(DbError::new("Buffer size does not match content size")
                .with_field("content_size", bytes.len())
                .with_field("buffer_size", buf.len()));
        }
        buf.copy_from_slice(bytes);
        Ok(())
    }

    pub fn free(&mut self) {
        self.bytes.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::scalar::ScalarValue;
    use crate::buffer::buffer_manager::NopBufferManager;

    fn list_input() -> (DataType, Array) {
        let datatype = DataType::list(DataType::Int32);
        let array = Array::try_from_scalars(
            &datatype,
            [
                ScalarValue::List(vec![ScalarValue::Int32(1), ScalarValue::Int32(2)]),
                ScalarValue::List(vec![ScalarValue::Int32(1), ScalarValue::Int32(2)]),
                ScalarValue::List(vec![ScalarValue::Int32(3)]),
            ],
        )
        .unwrap();
        (datatype, array)
    }

    #[test]
    fn append_and_compare() {
        let (datatype, input) = list_input();
        let mut store = ContentStore::new(datatype, &NopBufferManager);

        let a = store.append(&input, 0).unwrap();
        let b = store.append(&input, 1).unwrap();
        let c = store.append(&input, 2).unwrap();

        assert_eq!(a.hash, b.hash);
        assert!(store.equals(&a, &b));
        assert!(!store.equals(&a, &c));
        assert_eq!(a.size + b.size + c.size, store.len());
    }

    #[test]
    fn remove_last_restores_len() {
        let (datatype, input) = list_input();
        let mut store = ContentStore::new(datatype, &NopBufferManager);

        let a = store.append(&input, 0).unwrap();
        let len = store.len();
        let b = store.append(&input, 1).unwrap();

        store.remove_last(&a).unwrap_err();
        store.remove_last(&b).unwrap();
        assert_eq!(len, store.len());
    }

    #[test]
    fn read_back_value() {
        let (datatype, input) = list_input();
        let mut store = ContentStore::new(datatype.clone(), &NopBufferManager);
        let handle = store.append(&input, 2).unwrap();

        let mut output = Array::try_new(&datatype, 2).unwrap();
        store.read(&handle, &mut output, 1).unwrap();
        assert_eq!(input.get_value(2).unwrap(), output.get_value(1).unwrap());
    }

    #[test]
    fn serialized_copy() {
        let (datatype, input) = list_input();
        let mut store = ContentStore::new(datatype, &NopBufferManager);
        let handle = store.append(&input, 0).unwrap();

        let mut buf = vec![0; handle.size];
        store.read_serialized(&handle, &mut buf).unwrap();

        let copied = store.append_serialized(&buf, handle.hash).unwrap();
        assert!(store.equals(&handle, &copied));

        let mut short = vec![0; handle.size - 1];
        store.read_serialized(&handle, &mut short).unwrap_err();
    }
}
