//! Encoding for nested (list and struct) values.
//!
//! A value is encoded as:
//!
//! - Fixed width: native endian bytes. Floats are canonicalized first so that
//!   byte equality matches value equality.
//! - Utf8/Binary: `u32` length followed by the bytes.
//! - List: `u32` element count followed by each element.
//! - Map: same as a list of `{key, value}` structs.
//! - Struct: each field in declaration order.
//!
//! Elements of a list and fields of a struct are prefixed with a single
//! validity byte, and their value is omitted when null. The top level value is
//! never null and has no validity byte.
//!
//! Two equal values always produce identical bytes, which is what lets the
//! content store compare values byte-wise.

use bytes::BufMut;
use setagg_error::{DbError, OptionExt, Result, ResultExt};

use super::array::{Array, ArrayData};
use super::datatype::DataType;
use super::physical_type::{canonical_f32, canonical_f64};
use super::scalar::ScalarValue;
use crate::stream::ByteReader;

const NULL_FLAG: u8 = 0;
const VALID_FLAG: u8 = 1;

/// Encode the value at `row` and append the bytes to `buf`.
///
/// The value at `row` must be valid.
pub fn encode_value(array: &Array, row: usize, buf: &mut Vec<u8>) -> Result<()> {
    if !array.is_valid(row) {
        return Err(DbError::new("Cannot encode null or out of bounds value")
            .with_field("row", row)
            .with_field("len", array.len()));
    }

    match array.data() {
        ArrayData::Boolean(v) => buf.put_u8(v[row] as u8),
        ArrayData::Int8(v) => buf.put_i8(v[row]),
        ArrayData::Int16(v) => buf.put_i16_ne(v[row]),
        ArrayData::Int32(v) => buf.put_i32_ne(v[row]),
        ArrayData::Int64(v) => buf.put_i64_ne(v[row]),
        ArrayData::UInt8(v) => buf.put_u8(v[row]),
        ArrayData::UInt16(v) => buf.put_u16_ne(v[row]),
        ArrayData::UInt32(v) => buf.put_u32_ne(v[row]),
        ArrayData::UInt64(v) => buf.put_u64_ne(v[row]),
        ArrayData::Float32(v) => buf.put_f32_ne(canonical_f32(v[row])),
        ArrayData::Float64(v) => buf.put_f64_ne(canonical_f64(v[row])),
        ArrayData::Utf8(strings) | ArrayData::Binary(strings) => {
            let bytes = strings.get(row).required("string bytes")?;
            write_len(buf, bytes.len())?;
            buf.put_slice(bytes);
        }
        ArrayData::List(_) => {
            let entry = array.list_entry(row)?;
            let child = array.list_child()?;
            write_len(buf, entry.len)?;
            for child_idx in entry.offset..(entry.offset + entry.len) {
                encode_child(child, child_idx, buf)?;
            }
        }
        ArrayData::Struct(_) => {
            for child in array.struct_children()? {
                encode_child(child, row, buf)?;
            }
        }
    }

    Ok(())
}

fn encode_child(child: &Array, idx: usize, buf: &mut Vec<u8>) -> Result<()> {
    if child.is_valid(idx) {
        buf.put_u8(VALID_FLAG);
        encode_value(child, idx, buf)
    } else {
        buf.put_u8(NULL_FLAG);
        Ok(())
    }
}

fn write_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    buf.put_u32_ne(u32::try_from(len)?);
    Ok(())
}

/// Decode a single value of the given type from the reader.
pub fn decode_value(datatype: &DataType, reader: &mut ByteReader<'_>) -> Result<ScalarValue> {
    Ok(match datatype {
        DataType::Boolean => ScalarValue::Boolean(reader.read_value()?),
        DataType::Int8 => ScalarValue::Int8(reader.read_value()?),
        DataType::Int16 => ScalarValue::Int16(reader.read_value()?),
        DataType::Int32 => ScalarValue::Int32(reader.read_i32()?),
        DataType::Int64 => ScalarValue::Int64(reader.read_value()?),
        DataType::UInt8 => ScalarValue::UInt8(reader.read_u8()?),
        DataType::UInt16 => ScalarValue::UInt16(reader.read_value()?),
        DataType::UInt32 => ScalarValue::UInt32(reader.read_u32()?),
        DataType::UInt64 => ScalarValue::UInt64(reader.read_u64()?),
        DataType::Float32 => ScalarValue::Float32(reader.read_value()?),
        DataType::Float64 => ScalarValue::Float64(reader.read_value()?),
        DataType::Date32 => ScalarValue::Date32(reader.read_i32()?),
        DataType::Timestamp => ScalarValue::Timestamp(reader.read_value()?),
        DataType::Utf8 => {
            let len = read_len(reader)?;
            let bytes = reader.read_bytes(len)?;
            ScalarValue::Utf8(
                std::str::from_utf8(bytes)
                    .context("Invalid utf8 in nested value")?
                    .to_string(),
            )
        }
        DataType::Binary => {
            let len = read_len(reader)?;
            ScalarValue::Binary(reader.read_bytes(len)?.to_vec())
        }
        DataType::List(meta) => {
            let count = read_len(reader)?;
            // Don't trust the count for preallocation, every element needs at
            // least a validity byte.
            let mut values = Vec::with_capacity(usize::min(count, reader.remaining()));
            for _ in 0..count {
                values.push(decode_child(&meta.datatype, reader)?);
            }
            ScalarValue::List(values)
        }
        DataType::Map(meta) => {
            let count = read_len(reader)?;
            let mut entries = Vec::with_capacity(usize::min(count, reader.remaining()));
            for _ in 0..count {
                match reader.read_u8()? {
                    VALID_FLAG => (),
                    other => {
                        return Err(DbError::new("Invalid map entry flag in nested value")
                            .with_field("flag", other)
                            .with_field("offset", reader.offset() - 1));
                    }
                }
                let key = decode_child(&meta.key, reader)?;
                let value = decode_child(&meta.value, reader)?;
                entries.push((key, value));
            }
            ScalarValue::Map(entries)
        }
        DataType::Struct(meta) => {
            let fields = meta
                .fields
                .iter()
                .map(|(_, datatype)| decode_child(datatype, reader))
                .collect::<Result<Vec<_>>>()?;
            ScalarValue::Struct(fields)
        }
    })
}

fn read_len(reader: &mut ByteReader<'_>) -> Result<usize> {
    Ok(usize::try_from(reader.read_u32()?)?)
}

fn decode_child(datatype: &DataType, reader: &mut ByteReader<'_>) -> Result<ScalarValue> {
    match reader.read_u8()? {
        NULL_FLAG => Ok(ScalarValue::Null),
        VALID_FLAG => decode_value(datatype, reader),
        other => Err(DbError::new("Invalid validity flag in nested value")
            .with_field("flag", other)
            .with_field("offset", reader.offset() - 1)),
    }
}

/// Decode a value that must span exactly the provided bytes.
pub fn decode_exact(datatype: &DataType, bytes: &[u8]) -> Result<ScalarValue> {
    let mut reader = ByteReader::new(bytes);
    let value = decode_value(datatype, &mut reader)?;
    if !reader.is_exhausted() {
        return Err(DbError::new("Trailing bytes after nested value")
            .with_field("remaining", reader.remaining())
            .with_field("datatype", datatype));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_row(array: &Array, row: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_value(array, row, &mut buf).unwrap();
        buf
    }

    #[test]
    fn list_roundtrip() {
        let datatype = DataType::list(DataType::Int32);
        let value = ScalarValue::List(vec![
            ScalarValue::Int32(1),
            ScalarValue::Null,
            ScalarValue::Int32(3),
        ]);
        let array = Array::try_from_scalars(&datatype, [value.clone()]).unwrap();

        let buf = encode_row(&array, 0);
        // count + 3 flags + 2 values
        assert_eq!(4 + 3 + 8, buf.len());
        assert_eq!(value, decode_exact(&datatype, &buf).unwrap());
    }

    #[test]
    fn struct_with_nested_list_roundtrip() {
        let datatype = DataType::structure([
            ("name", DataType::Utf8),
            ("tags", DataType::list(DataType::Utf8)),
            ("score", DataType::Float64),
        ]);
        let value = ScalarValue::Struct(vec![
            "a name that is long enough for the heap".into(),
            ScalarValue::List(vec!["x".into(), "y".into()]),
            ScalarValue::Null,
        ]);
        let array = Array::try_from_scalars(&datatype, [value.clone()]).unwrap();

        let buf = encode_row(&array, 0);
        assert_eq!(value, decode_exact(&datatype, &buf).unwrap());
    }

    #[test]
    fn equal_values_equal_bytes() {
        let datatype = DataType::list(DataType::Float64);
        let array = Array::try_from_scalars(
            &datatype,
            [
                ScalarValue::List(vec![ScalarValue::Float64(-0.0), ScalarValue::Float64(f64::NAN)]),
                ScalarValue::List(vec![
                    ScalarValue::Float64(0.0),
                    ScalarValue::Float64(-f64::NAN),
                ]),
            ],
        )
        .unwrap();

        assert_eq!(encode_row(&array, 0), encode_row(&array, 1));
    }

    #[test]
    fn null_and_empty_list_differ() {
        let datatype = DataType::structure([("a", DataType::list(DataType::Int8))]);
        let array = Array::try_from_scalars(
            &datatype,
            [
                ScalarValue::Struct(vec![ScalarValue::Null]),
                ScalarValue::Struct(vec![ScalarValue::List(Vec::new())]),
            ],
        )
        .unwrap();

        assert_ne!(encode_row(&array, 0), encode_row(&array, 1));
    }

    #[test]
    fn encode_null_top_level_errors() {
        let datatype = DataType::list(DataType::Int8);
        let array = Array::try_from_scalars(&datatype, [ScalarValue::Null]).unwrap();
        let mut buf = Vec::new();
        encode_value(&array, 0, &mut buf).unwrap_err();
    }

    #[test]
    fn decode_truncated() {
        let datatype = DataType::list(DataType::Int64);
        let array = Array::try_from_scalars(
            &datatype,
            [ScalarValue::List(vec![ScalarValue::Int64(7)])],
        )
        .unwrap();
        let buf = encode_row(&array, 0);

        decode_exact(&datatype, &buf[..buf.len() - 1]).unwrap_err();
    }

    #[test]
    fn decode_trailing_bytes() {
        let datatype = DataType::list(DataType::Int8);
        let array =
            Array::try_from_scalars(&datatype, [ScalarValue::List(Vec::new())]).unwrap();
        let mut buf = encode_row(&array, 0);
        buf.push(0);

        decode_exact(&datatype, &buf).unwrap_err();
    }

    #[test]
    fn decode_invalid_flag() {
        let datatype = DataType::list(DataType::Int8);
        let mut buf = Vec::new();
        buf.put_u32_ne(1);
        buf.put_u8(7);
        buf.put_u8(1);

        decode_exact(&datatype, &buf).unwrap_err();
    }

    #[test]
    fn map_roundtrip() {
        let datatype = DataType::map(DataType::Utf8, DataType::Int64);
        let value = ScalarValue::Map(vec![
            ("a".into(), ScalarValue::Int64(1)),
            ("b".into(), ScalarValue::Null),
        ]);
        let array = Array::try_from_scalars(&datatype, [value.clone()]).unwrap();

        let buf = encode_row(&array, 0);
        // count + per entry (entry flag + key flag + key len + key + value flag)
        // + one value
        assert_eq!(4 + 2 * (1 + 1 + 4 + 1 + 1) + 8, buf.len());
        assert_eq!(value, decode_exact(&datatype, &buf).unwrap());
    }

    #[test]
    fn map_null_entry_rejected() {
        let datatype = DataType::map(DataType::Int8, DataType::Int8);
        let mut buf = Vec::new();
        buf.put_u32_ne(1);
        buf.put_u8(NULL_FLAG);

        decode_exact(&datatype, &buf).unwrap_err();
    }
}
