use setagg_error::{DbError, OptionExt, Result};

use super::datatype::DataType;
use super::physical_type::PhysicalType;
use super::scalar::ScalarValue;
use super::string::{StringBuffer, StringView};
use super::validity::Validity;

/// Metadata for a single list value, pointing into the child array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListItemMetadata {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct ListBuffer {
    pub(crate) metadata: Vec<ListItemMetadata>,
    pub(crate) child: Box<Array>,
}

#[derive(Debug, Clone)]
pub struct StructBuffer {
    pub(crate) children: Vec<Array>,
}

/// Physical storage for an array.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Boolean(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(StringBuffer),
    Binary(StringBuffer),
    List(ListBuffer),
    Struct(StructBuffer),
}

impl ArrayData {
    pub const fn physical_type(&self) -> PhysicalType {
        match self {
            Self::Boolean(_) => PhysicalType::Boolean,
            Self::Int8(_) => PhysicalType::Int8,
            Self::Int16(_) => PhysicalType::Int16,
            Self::Int32(_) => PhysicalType::Int32,
            Self::Int64(_) => PhysicalType::Int64,
            Self::UInt8(_) => PhysicalType::UInt8,
            Self::UInt16(_) => PhysicalType::UInt16,
            Self::UInt32(_) => PhysicalType::UInt32,
            Self::UInt64(_) => PhysicalType::UInt64,
            Self::Float32(_) => PhysicalType::Float32,
            Self::Float64(_) => PhysicalType::Float64,
            Self::Utf8(_) => PhysicalType::Utf8,
            Self::Binary(_) => PhysicalType::Binary,
            Self::List(_) => PhysicalType::List,
            Self::Struct(_) => PhysicalType::Struct,
        }
    }

    fn try_new(datatype: &DataType, len: usize) -> Result<Self> {
        Ok(match datatype {
            DataType::Boolean => ArrayData::Boolean(vec![false; len]),
            DataType::Int8 => ArrayData::Int8(vec![0; len]),
            DataType::Int16 => ArrayData::Int16(vec![0; len]),
            DataType::Int32 | DataType::Date32 => ArrayData::Int32(vec![0; len]),
            DataType::Int64 | DataType::Timestamp => ArrayData::Int64(vec![0; len]),
            DataType::UInt8 => ArrayData::UInt8(vec![0; len]),
            DataType::UInt16 => ArrayData::UInt16(vec![0; len]),
            DataType::UInt32 => ArrayData::UInt32(vec![0; len]),
            DataType::UInt64 => ArrayData::UInt64(vec![0; len]),
            DataType::Float32 => ArrayData::Float32(vec![0.0; len]),
            DataType::Float64 => ArrayData::Float64(vec![0.0; len]),
            DataType::Utf8 => ArrayData::Utf8(StringBuffer::with_len(len)),
            DataType::Binary => ArrayData::Binary(StringBuffer::with_len(len)),
            DataType::List(meta) => ArrayData::List(ListBuffer {
                metadata: vec![ListItemMetadata::default(); len],
                child: Box::new(Array::try_new(&meta.datatype, 0)?),
            }),
            DataType::Map(meta) => ArrayData::List(ListBuffer {
                metadata: vec![ListItemMetadata::default(); len],
                child: Box::new(Array::try_new(&meta.entry_type(), 0)?),
            }),
            DataType::Struct(meta) => ArrayData::Struct(StructBuffer {
                children: meta
                    .fields
                    .iter()
                    .map(|(_, datatype)| Array::try_new(datatype, len))
                    .collect::<Result<Vec<_>>>()?,
            }),
        })
    }

    /// Push a default value onto the end of the data.
    fn push_default(&mut self) {
        match self {
            Self::Boolean(v) => v.push(false),
            Self::Int8(v) => v.push(0),
            Self::Int16(v) => v.push(0),
            Self::Int32(v) => v.push(0),
            Self::Int64(v) => v.push(0),
            Self::UInt8(v) => v.push(0),
            Self::UInt16(v) => v.push(0),
            Self::UInt32(v) => v.push(0),
            Self::UInt64(v) => v.push(0),
            Self::Float32(v) => v.push(0.0),
            Self::Float64(v) => v.push(0.0),
            Self::Utf8(buf) | Self::Binary(buf) => buf.views.push(StringView::EMPTY),
            Self::List(list) => list.metadata.push(ListItemMetadata {
                offset: list.child.len(),
                len: 0,
            }),
            Self::Struct(s) => {
                for child in &mut s.children {
                    child.push_default();
                }
            }
        }
    }
}

/// A column of values with an associated validity mask.
///
/// This is the decoded input for accumulators and the output they extract
/// into.
#[derive(Debug, Clone)]
pub struct Array {
    datatype: DataType,
    validity: Validity,
    data: ArrayData,
}

impl Array {
    /// Create a new array of the given length.
    ///
    /// All values are valid and initialized to some default value.
    pub fn try_new(datatype: &DataType, len: usize) -> Result<Self> {
        Ok(Array {
            datatype: datatype.clone(),
            validity: Validity::new_all_valid(len),
            data: ArrayData::try_new(datatype, len)?,
        })
    }

    /// Create a new array from an iterator of scalars.
    pub fn try_from_scalars(
        datatype: &DataType,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> Result<Self> {
        let mut array = Self::try_new(datatype, 0)?;
        for value in values {
            array.push_value(&value)?;
        }
        Ok(array)
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayData {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        idx < self.len() && self.validity.is_valid(idx)
    }

    fn check_bounds(&self, idx: usize) -> Result<()> {
        if idx >= self.len() {
            return Err(DbError::new("Index out of bounds for array")
                .with_field("idx", idx)
                .with_field("len", self.len()));
        }
        Ok(())
    }

    pub fn set_null(&mut self, idx: usize) -> Result<()> {
        self.check_bounds(idx)?;
        self.validity.set_invalid(idx);
        Ok(())
    }

    pub fn set_valid(&mut self, idx: usize) -> Result<()> {
        self.check_bounds(idx)?;
        self.validity.set_valid(idx);
        Ok(())
    }

    fn push_default(&mut self) {
        self.data.push_default();
        self.validity.push(true);
    }

    /// Push a value onto the end of the array.
    pub fn push_value(&mut self, value: &ScalarValue) -> Result<()> {
        self.push_default();
        self.set_value(self.len() - 1, value)
    }

    /// Get the value at the given index.
    pub fn get_value(&self, idx: usize) -> Result<ScalarValue> {
        self.check_bounds(idx)?;
        if !self.validity.is_valid(idx) {
            return Ok(ScalarValue::Null);
        }

        Ok(match (&self.datatype, &self.data) {
            (DataType::Date32, ArrayData::Int32(v)) => ScalarValue::Date32(v[idx]),
            (DataType::Timestamp, ArrayData::Int64(v)) => ScalarValue::Timestamp(v[idx]),
            (_, ArrayData::Boolean(v)) => ScalarValue::Boolean(v[idx]),
            (_, ArrayData::Int8(v)) => ScalarValue::Int8(v[idx]),
            (_, ArrayData::Int16(v)) => ScalarValue::Int16(v[idx]),
            (_, ArrayData::Int32(v)) => ScalarValue::Int32(v[idx]),
            (_, ArrayData::Int64(v)) => ScalarValue::Int64(v[idx]),
            (_, ArrayData::UInt8(v)) => ScalarValue::UInt8(v[idx]),
            (_, ArrayData::UInt16(v)) => ScalarValue::UInt16(v[idx]),
            (_, ArrayData::UInt32(v)) => ScalarValue::UInt32(v[idx]),
            (_, ArrayData::UInt64(v)) => ScalarValue::UInt64(v[idx]),
            (_, ArrayData::Float32(v)) => ScalarValue::Float32(v[idx]),
            (_, ArrayData::Float64(v)) => ScalarValue::Float64(v[idx]),
            (_, ArrayData::Utf8(buf)) => {
                let bs = buf.get(idx).required("string value")?;
                ScalarValue::Utf8(std::str::from_utf8(bs)?.to_string())
            }
            (_, ArrayData::Binary(buf)) => {
                ScalarValue::Binary(buf.get(idx).required("binary value")?.to_vec())
            }
            (DataType::Map(_), ArrayData::List(list)) => {
                let meta = list.metadata[idx];
                let fields = list.child.struct_children()?;
                let (keys, values) = match fields {
                    [keys, values] => (keys, values),
                    _ => {
                        return Err(DbError::new("Map entries should have two fields")
                            .with_field("fields", fields.len()));
                    }
                };
                let entries = (meta.offset..(meta.offset + meta.len))
                    .map(|child_idx| -> Result<_> {
                        Ok((keys.get_value(child_idx)?, values.get_value(child_idx)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                ScalarValue::Map(entries)
            }
            (_, ArrayData::List(list)) => {
                let meta = list.metadata[idx];
                let values = (meta.offset..(meta.offset + meta.len))
                    .map(|child_idx| list.child.get_value(child_idx))
                    .collect::<Result<Vec<_>>>()?;
                ScalarValue::List(values)
            }
            (_, ArrayData::Struct(s)) => {
                let fields = s
                    .children
                    .iter()
                    .map(|child| child.get_value(idx))
                    .collect::<Result<Vec<_>>>()?;
                ScalarValue::Struct(fields)
            }
        })
    }

    /// Set a value at the given index.
    ///
    /// Setting a list value appends the list's elements to the child array.
    pub fn set_value(&mut self, idx: usize, value: &ScalarValue) -> Result<()> {
        self.check_bounds(idx)?;
        if value.is_null() {
            self.validity.set_invalid(idx);
            return Ok(());
        }

        match (&mut self.data, value) {
            (ArrayData::Boolean(v), ScalarValue::Boolean(x)) => v[idx] = *x,
            (ArrayData::Int8(v), ScalarValue::Int8(x)) => v[idx] = *x,
            (ArrayData::Int16(v), ScalarValue::Int16(x)) => v[idx] = *x,
            (ArrayData::Int32(v), ScalarValue::Int32(x) | ScalarValue::Date32(x)) => v[idx] = *x,
            (ArrayData::Int64(v), ScalarValue::Int64(x) | ScalarValue::Timestamp(x)) => {
                v[idx] = *x
            }
            (ArrayData::UInt8(v), ScalarValue::UInt8(x)) => v[idx] = *x,
            (ArrayData::UInt16(v), ScalarValue::UInt16(x)) => v[idx] = *x,
            (ArrayData::UInt32(v), ScalarValue::UInt32(x)) => v[idx] = *x,
            (ArrayData::UInt64(v), ScalarValue::UInt64(x)) => v[idx] = *x,
            (ArrayData::Float32(v), ScalarValue::Float32(x)) => v[idx] = *x,
            (ArrayData::Float64(v), ScalarValue::Float64(x)) => v[idx] = *x,
            (ArrayData::Utf8(buf), ScalarValue::Utf8(s)) => buf.put(idx, s.as_bytes())?,
            (ArrayData::Binary(buf), ScalarValue::Binary(b)) => buf.put(idx, b)?,
            (ArrayData::List(list), ScalarValue::List(values)) => {
                let offset = list.child.len();
                for value in values {
                    list.child.push_value(value)?;
                }
                list.metadata[idx] = ListItemMetadata {
                    offset,
                    len: values.len(),
                };
            }
            (ArrayData::List(list), ScalarValue::Map(entries)) => {
                let offset = list.child.len();
                for (key, value) in entries {
                    list.child
                        .push_value(&ScalarValue::Struct(vec![key.clone(), value.clone()]))?;
                }
                list.metadata[idx] = ListItemMetadata {
                    offset,
                    len: entries.len(),
                };
            }
            (ArrayData::Struct(s), ScalarValue::Struct(fields)) => {
                if s.children.len() != fields.len() {
                    return Err(DbError::new("Struct field count mismatch")
                        .with_field("expected", s.children.len())
                        .with_field("actual", fields.len()));
                }
                for (child, field) in s.children.iter_mut().zip(fields) {
                    child.set_value(idx, field)?;
                }
            }
            (_, value) => {
                return Err(DbError::new("Cannot set value in array")
                    .with_field("datatype", &self.datatype)
                    .with_field("value", value));
            }
        }

        self.validity.set_valid(idx);
        Ok(())
    }

    /// Get the bytes for a string or binary value.
    pub fn get_bytes(&self, idx: usize) -> Result<&[u8]> {
        self.check_bounds(idx)?;
        match &self.data {
            ArrayData::Utf8(buf) | ArrayData::Binary(buf) => buf.get(idx).required("string bytes"),
            other => Err(DbError::new("Expected string or binary array")
                .with_field("physical_type", other.physical_type())),
        }
    }

    /// Get the string buffer for a utf8 or binary array.
    pub fn string_buffer_mut(&mut self) -> Result<&mut StringBuffer> {
        match &mut self.data {
            ArrayData::Utf8(buf) | ArrayData::Binary(buf) => Ok(buf),
            other => Err(DbError::new("Expected string or binary array")
                .with_field("physical_type", other.physical_type())),
        }
    }

    /// Get the list metadata for the list value at the given index.
    pub fn list_entry(&self, idx: usize) -> Result<ListItemMetadata> {
        self.check_bounds(idx)?;
        match &self.data {
            ArrayData::List(list) => Ok(list.metadata[idx]),
            other => Err(DbError::new("Expected list array")
                .with_field("physical_type", other.physical_type())),
        }
    }

    /// Get the child array holding all list elements.
    pub fn list_child(&self) -> Result<&Array> {
        match &self.data {
            ArrayData::List(list) => Ok(&list.child),
            other => Err(DbError::new("Expected list array")
                .with_field("physical_type", other.physical_type())),
        }
    }

    pub fn struct_children(&self) -> Result<&[Array]> {
        match &self.data {
            ArrayData::Struct(s) => Ok(&s.children),
            other => Err(DbError::new("Expected struct array")
                .with_field("physical_type", other.physical_type())),
        }
    }
}
