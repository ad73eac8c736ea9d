//! Byte streams for reading and writing serialized accumulator state.
//!
//! Thin wrappers around `bytes::{Buf, BufMut}` that check bounds before every
//! read or write. Values use native endian order with fixed widths, and going
//! past the end of the buffer is an error rather than a panic.

use bytes::{Buf, BufMut};
use setagg_error::{DbError, Result};

use crate::arrays::physical_type::FixedWidthValue;

const SIZE_OF_USIZE: usize = std::mem::size_of::<usize>();

/// Reads values from a serialized buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    /// Unread bytes.
    buf: &'a [u8],
    /// Length of the original buffer.
    len: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader {
            buf,
            len: buf.len(),
        }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.len - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure_remaining(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(
                DbError::new("Attempted to read past end of serialized buffer")
                    .with_field("offset", self.offset())
                    .with_field("len", len)
                    .with_field("buffer_len", self.len),
            );
        }
        Ok(())
    }

    /// Read the next `len` bytes.
    ///
    /// The returned slice borrows from the underlying buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure_remaining(len)?;
        let unread: &'a [u8] = self.buf;
        let bytes = &unread[..len];
        self.buf.advance(len);
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_remaining(4)?;
        Ok(self.buf.get_u32_ne())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.buf.get_i32_ne())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure_remaining(8)?;
        Ok(self.buf.get_u64_ne())
    }

    pub fn read_usize(&mut self) -> Result<usize> {
        self.ensure_remaining(SIZE_OF_USIZE)?;
        let mut bytes = [0; SIZE_OF_USIZE];
        self.buf.copy_to_slice(&mut bytes);
        Ok(usize::from_ne_bytes(bytes))
    }

    pub fn read_value<T: FixedWidthValue>(&mut self) -> Result<T> {
        self.ensure_remaining(T::WIDTH)?;
        Ok(T::get_ne(&mut self.buf))
    }
}

/// Writes values into a buffer of a known size.
#[derive(Debug)]
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter { buf, offset: 0 }
    }

    /// Number of bytes written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get the region `pos..pos+len` as a `BufMut`, moving the write offset to
    /// its end if that's past the current offset.
    fn region_mut(&mut self, pos: usize, len: usize) -> Result<&mut [u8]> {
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                DbError::new("Attempted to write past end of serialization buffer")
                    .with_field("pos", pos)
                    .with_field("len", len)
                    .with_field("buffer_len", self.buf.len())
            })?;
        self.offset = usize::max(self.offset, end);
        Ok(&mut self.buf[pos..end])
    }

    fn next_region_mut(&mut self, len: usize) -> Result<&mut [u8]> {
        self.region_mut(self.offset, len)
    }

    /// Write a fixed width value at some absolute position in the buffer.
    pub fn write_value_at<T: FixedWidthValue>(&mut self, pos: usize, value: &T) -> Result<()> {
        let mut dst = self.region_mut(pos, T::WIDTH)?;
        value.put_ne(&mut dst);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.next_region_mut(bytes.len())?.put_slice(bytes);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.next_region_mut(4)?.put_i32_ne(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.next_region_mut(8)?.put_u64_ne(value);
        Ok(())
    }

    pub fn write_usize(&mut self, value: usize) -> Result<()> {
        self.next_region_mut(SIZE_OF_USIZE)?
            .put_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Get a mutable slice for the next `len` bytes, advancing the offset.
    pub fn next_slice_mut(&mut self, len: usize) -> Result<&mut [u8]> {
        self.next_region_mut(len)
    }

    /// Assert that the entire buffer was written to.
    pub fn finish(self) -> Result<()> {
        if self.offset != self.buf.len() {
            return Err(DbError::new("Serialized size does not match buffer size")
                .with_field("written", self.offset)
                .with_field("buffer_len", self.buf.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut buf = vec![0; 4 + SIZE_OF_USIZE + 8 + 2 + 3];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(-1).unwrap();
        writer.write_usize(42).unwrap();
        writer.write_u64(7).unwrap();
        writer.write_value_at(4 + SIZE_OF_USIZE + 8, &-3_i16).unwrap();
        writer.write_bytes(b"abc").unwrap();
        writer.finish().unwrap();

        let mut reader = ByteReader::new(&buf);
        assert_eq!(-1, reader.read_i32().unwrap());
        assert_eq!(42, reader.read_usize().unwrap());
        assert_eq!(7, reader.read_u64().unwrap());
        assert_eq!(-3, reader.read_value::<i16>().unwrap());
        assert_eq!(b"abc", reader.read_bytes(3).unwrap());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn native_endian_layout() {
        let mut buf = vec![0; 4];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(0x0102_0304).unwrap();
        writer.finish().unwrap();
        assert_eq!(0x0102_0304_i32.to_ne_bytes().to_vec(), buf);
    }

    #[test]
    fn read_past_end() {
        let buf = [1, 2, 3];
        let mut reader = ByteReader::new(&buf);
        reader.read_i32().unwrap_err();
        // Failed read doesn't consume anything.
        assert_eq!(0, reader.offset());
        assert_eq!(3, reader.remaining());

        assert_eq!(1, reader.read_u8().unwrap());
        assert_eq!(1, reader.offset());
        reader.read_bytes(3).unwrap_err();
        reader.read_value::<u16>().unwrap();
        assert!(reader.is_exhausted());
    }

    #[test]
    fn write_past_end() {
        let mut buf = [0; 6];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(1).unwrap();
        writer.write_i32(2).unwrap_err();
        writer.write_value_at(6, &1_u8).unwrap_err();
        writer.write_value_at(usize::MAX, &1_u8).unwrap_err();
        assert_eq!(4, writer.offset());
    }

    #[test]
    fn finish_requires_full_write() {
        let mut buf = [0; 8];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_i32(1).unwrap();
        writer.finish().unwrap_err();
    }

    #[test]
    fn write_at_out_of_order() {
        let mut buf = [0; 4];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_value_at(2, &3_u8).unwrap();
        writer.write_value_at(3, &4_u8).unwrap();
        assert_eq!(4, writer.offset());
        writer.write_value_at(0, &1_u8).unwrap();
        writer.write_value_at(1, &2_u8).unwrap();
        assert_eq!(4, writer.offset());
        writer.finish().unwrap();
        assert_eq!([1, 2, 3, 4], buf);
    }
}
