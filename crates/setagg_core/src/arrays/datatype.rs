use std::fmt;

use super::physical_type::PhysicalType;

/// Metadata associated with structs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructTypeMeta {
    pub fields: Vec<(String, DataType)>,
}

/// Metadata associated with lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListTypeMeta {
    pub datatype: Box<DataType>,
}

impl ListTypeMeta {
    pub fn new(element_type: DataType) -> Self {
        ListTypeMeta {
            datatype: Box::new(element_type),
        }
    }
}

/// Metadata associated with maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapTypeMeta {
    pub key: Box<DataType>,
    pub value: Box<DataType>,
}

impl MapTypeMeta {
    pub fn new(key: DataType, value: DataType) -> Self {
        MapTypeMeta {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// Type of a single entry, as stored in the child array.
    pub fn entry_type(&self) -> DataType {
        DataType::structure([
            ("key", self.key.as_ref().clone()),
            ("value", self.value.as_ref().clone()),
        ])
    }
}

/// Supported data types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Days since epoch.
    Date32,
    /// Microseconds since epoch.
    Timestamp,
    Utf8,
    Binary,
    /// A struct of different types.
    Struct(StructTypeMeta),
    /// A list of values all of the same type.
    List(ListTypeMeta),
    /// Key/value pairs, stored as a list of entry structs.
    Map(MapTypeMeta),
}

/// How values of a datatype are stored by a set accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    /// Values are copied by value into the set.
    FixedWidth,
    /// Values are byte strings, possibly inlined.
    String,
    /// Values are nested and stored as serialized bytes.
    Complex,
}

impl DataType {
    pub const fn physical_type(&self) -> PhysicalType {
        match self {
            DataType::Boolean => PhysicalType::Boolean,
            DataType::Int8 => PhysicalType::Int8,
            DataType::Int16 => PhysicalType::Int16,
            DataType::Int32 | DataType::Date32 => PhysicalType::Int32,
            DataType::Int64 | DataType::Timestamp => PhysicalType::Int64,
            DataType::UInt8 => PhysicalType::UInt8,
            DataType::UInt16 => PhysicalType::UInt16,
            DataType::UInt32 => PhysicalType::UInt32,
            DataType::UInt64 => PhysicalType::UInt64,
            DataType::Float32 => PhysicalType::Float32,
            DataType::Float64 => PhysicalType::Float64,
            DataType::Utf8 => PhysicalType::Utf8,
            DataType::Binary => PhysicalType::Binary,
            DataType::Struct(_) => PhysicalType::Struct,
            DataType::List(_) | DataType::Map(_) => PhysicalType::List,
        }
    }

    pub const fn value_category(&self) -> ValueCategory {
        match self.physical_type() {
            PhysicalType::Utf8 | PhysicalType::Binary => ValueCategory::String,
            PhysicalType::List | PhysicalType::Struct => ValueCategory::Complex,
            _ => ValueCategory::FixedWidth,
        }
    }

    pub fn list(element_type: DataType) -> Self {
        DataType::List(ListTypeMeta::new(element_type))
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        DataType::Map(MapTypeMeta::new(key, value))
    }

    pub fn structure(fields: impl IntoIterator<Item = (impl Into<String>, DataType)>) -> Self {
        DataType::Struct(StructTypeMeta {
            fields: fields
                .into_iter()
                .map(|(name, datatype)| (name.into(), datatype))
                .collect(),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt8 => write!(f, "UInt8"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Float32 => write!(f, "Float32"),
            Self::Float64 => write!(f, "Float64"),
            Self::Date32 => write!(f, "Date32"),
            Self::Timestamp => write!(f, "Timestamp"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Binary => write!(f, "Binary"),
            Self::Struct(meta) => {
                write!(f, "Struct {{")?;
                for (idx, (name, datatype)) in meta.fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {datatype}")?;
                }
                write!(f, " }}")
            }
            Self::List(meta) => write!(f, "List[{}]", meta.datatype),
            Self::Map(meta) => write!(f, "Map[{}, {}]", meta.key, meta.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(ValueCategory::FixedWidth, DataType::Date32.value_category());
        assert_eq!(ValueCategory::String, DataType::Binary.value_category());
        assert_eq!(
            ValueCategory::Complex,
            DataType::list(DataType::Int32).value_category()
        );
        assert_eq!(
            ValueCategory::Complex,
            DataType::map(DataType::Utf8, DataType::Int32).value_category()
        );
    }

    #[test]
    fn display_nested() {
        let datatype = DataType::structure([
            ("a", DataType::Int64),
            ("b", DataType::list(DataType::Utf8)),
        ]);
        assert_eq!("Struct { a: Int64, b: List[Utf8] }", datatype.to_string());

        let datatype = DataType::map(DataType::Utf8, DataType::list(DataType::Int8));
        assert_eq!("Map[Utf8, List[Int8]]", datatype.to_string());
    }
}
