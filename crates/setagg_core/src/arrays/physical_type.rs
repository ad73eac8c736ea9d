use std::fmt::{self, Debug};

use bytes::{Buf, BufMut};
use setagg_error::{DbError, Result};

use super::array::ArrayData;
use crate::hash::hash_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalType {
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
    Binary,
    Utf8,
    List,
    Struct,
}

impl PhysicalType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Binary => "Binary",
            Self::Utf8 => "Utf8",
            Self::List => "List",
            Self::Struct => "Struct",
        }
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value with a fixed byte width.
///
/// Equality and hashing used by set accumulators go through this trait rather
/// than `PartialEq`/`Hash` so that floats get a total equality.
pub trait FixedWidthValue: Debug + Copy + Default + Send + Sync + 'static {
    const WIDTH: usize = std::mem::size_of::<Self>();

    /// Write the value in native endian order.
    fn put_ne(&self, buf: &mut impl BufMut);

    /// Read a value written with `put_ne`.
    ///
    /// Panics if `buf` has fewer than `WIDTH` bytes remaining.
    fn get_ne(buf: &mut impl Buf) -> Self;

    fn set_eq(&self, other: &Self) -> bool;

    fn set_hash(&self) -> u64;
}

macro_rules! impl_fixed_width_int {
    ($prim:ty, $put:ident, $get:ident) => {
        impl FixedWidthValue for $prim {
            fn put_ne(&self, buf: &mut impl BufMut) {
                buf.$put(*self)
            }

            fn get_ne(buf: &mut impl Buf) -> Self {
                buf.$get()
            }

            fn set_eq(&self, other: &Self) -> bool {
                self == other
            }

            fn set_hash(&self) -> u64 {
                hash_value(self)
            }
        }
    };
}

impl_fixed_width_int!(i8, put_i8, get_i8);
impl_fixed_width_int!(i16, put_i16_ne, get_i16_ne);
impl_fixed_width_int!(i32, put_i32_ne, get_i32_ne);
impl_fixed_width_int!(i64, put_i64_ne, get_i64_ne);
impl_fixed_width_int!(u8, put_u8, get_u8);
impl_fixed_width_int!(u16, put_u16_ne, get_u16_ne);
impl_fixed_width_int!(u32, put_u32_ne, get_u32_ne);
impl_fixed_width_int!(u64, put_u64_ne, get_u64_ne);

// Floats compare on canonical bits. Negative zero is folded into positive zero
// and every NaN is treated as the same value.
macro_rules! impl_fixed_width_float {
    ($prim:ty, $canonical:ident, $put:ident, $get:ident) => {
        pub(crate) fn $canonical(v: $prim) -> $prim {
            if v.is_nan() {
                <$prim>::NAN
            } else if v == 0.0 {
                0.0
            } else {
                v
            }
        }

        impl FixedWidthValue for $prim {
            fn put_ne(&self, buf: &mut impl BufMut) {
                buf.$put(*self)
            }

            fn get_ne(buf: &mut impl Buf) -> Self {
                buf.$get()
            }

            fn set_eq(&self, other: &Self) -> bool {
                $canonical(*self).to_bits() == $canonical(*other).to_bits()
            }

            fn set_hash(&self) -> u64 {
                hash_value(&$canonical(*self).to_bits())
            }
        }
    };
}

impl_fixed_width_float!(f32, canonical_f32, put_f32_ne, get_f32_ne);
impl_fixed_width_float!(f64, canonical_f64, put_f64_ne, get_f64_ne);

impl FixedWidthValue for bool {
    fn put_ne(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self as u8)
    }

    fn get_ne(buf: &mut impl Buf) -> Self {
        buf.get_u8() != 0
    }

    fn set_eq(&self, other: &Self) -> bool {
        self == other
    }

    fn set_hash(&self) -> u64 {
        hash_value(self)
    }
}

/// Helper trait for getting typed access to fixed width array data.
pub trait PhysicalStorage: Debug + Default + Sync + Send + Clone + Copy + 'static {
    const PHYSICAL_TYPE: PhysicalType;

    type StorageType: FixedWidthValue;

    fn get_slice(data: &ArrayData) -> Result<&[Self::StorageType]>;

    fn get_slice_mut(data: &mut ArrayData) -> Result<&mut [Self::StorageType]>;
}

macro_rules! generate_primitive {
    ($prim:ty, $name:ident, $variant:ident) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl PhysicalStorage for $name {
            const PHYSICAL_TYPE: PhysicalType = PhysicalType::$variant;

            type StorageType = $prim;

            fn get_slice(data: &ArrayData) -> Result<&[Self::StorageType]> {
                match data {
                    ArrayData::$variant(values) => Ok(values),
                    other => Err(invalid_buffer_error(Self::PHYSICAL_TYPE, other)),
                }
            }

            fn get_slice_mut(data: &mut ArrayData) -> Result<&mut [Self::StorageType]> {
                match data {
                    ArrayData::$variant(values) => Ok(values),
                    other => Err(invalid_buffer_error(Self::PHYSICAL_TYPE, other)),
                }
            }
        }
    };
}

fn invalid_buffer_error(expected: PhysicalType, data: &ArrayData) -> DbError {
    DbError::new("Invalid buffer type")
        .with_field("expected_type", expected)
        .with_field("actual_type", data.physical_type())
}

generate_primitive!(bool, PhysicalBool, Boolean);

generate_primitive!(i8, PhysicalI8, Int8);
generate_primitive!(i16, PhysicalI16, Int16);
generate_primitive!(i32, PhysicalI32, Int32);
generate_primitive!(i64, PhysicalI64, Int64);

generate_primitive!(u8, PhysicalU8, UInt8);
generate_primitive!(u16, PhysicalU16, UInt16);
generate_primitive!(u32, PhysicalU32, UInt32);
generate_primitive!(u64, PhysicalU64, UInt64);

generate_primitive!(f32, PhysicalF32, Float32);
generate_primitive!(f64, PhysicalF64, Float64);
