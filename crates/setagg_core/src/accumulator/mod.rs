//! Per-group accumulators collecting the distinct values of a column.
//!
//! Each accumulator records the order in which distinct values (and at most
//! one null) were first seen. The position in that order is the value's
//! ordinal, and values are extracted to `offset + ordinal` in the output.
//!
//! Accumulators can be serialized to a single binary cell for spilling, and
//! restored into a fresh accumulator with the same ordinals.
//!
//! Memory for accumulator state is reserved through a buffer manager and is
//! only released by calling `free`. Dropping an accumulator without freeing
//! it leaks the reservation.

pub mod complex;
pub mod content;
pub mod ordered_set;
pub mod scalar;
pub mod string;

use std::fmt::Debug;

use complex::ComplexSetAccumulator;
use scalar::ScalarSetAccumulator;
use setagg_error::{DbError, Result};
use string::StringSetAccumulator;
use tracing::trace;

use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::arrays::physical_type::{
    PhysicalBool,
    PhysicalF32,
    PhysicalF64,
    PhysicalI8,
    PhysicalI16,
    PhysicalI32,
    PhysicalI64,
    PhysicalType,
    PhysicalU8,
    PhysicalU16,
    PhysicalU32,
    PhysicalU64,
};
use crate::buffer::buffer_manager::BufferManager;
use crate::config::AccumulatorConfig;

/// Null index written to serialized state when the set has no null.
pub const NO_NULL_INDEX: i32 = -1;

pub const SIZE_OF_INDEX: usize = std::mem::size_of::<i32>();
pub const SIZE_OF_COUNT: usize = std::mem::size_of::<usize>();
pub const SIZE_OF_HASH: usize = std::mem::size_of::<u64>();

pub trait SetAccumulator: Debug + Send {
    /// Add the value at `row` to the set.
    ///
    /// A null is only recorded the first time it's seen, and a value already
    /// in the set is ignored.
    fn add_value(&mut self, input: &Array, row: usize) -> Result<()>;

    /// Add every element of the list at `row` to the set, in order.
    ///
    /// A null list adds nothing.
    fn add_values(&mut self, input: &Array, row: usize) -> Result<()> {
        let entry = input.list_entry(row)?;
        if !input.is_valid(row) {
            return Ok(());
        }
        let child = input.list_child()?;
        for child_idx in entry.offset..(entry.offset + entry.len) {
            self.add_value(child, child_idx)?;
        }
        Ok(())
    }

    /// Number of distinct values, counting a null if one was seen.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Ordinal assigned to the null, if one was seen.
    fn null_index(&self) -> Option<i32>;

    /// Write every member to `output[offset + ordinal]`.
    ///
    /// Returns the number of values written.
    fn extract_values(&self, output: &mut Array, offset: usize) -> Result<usize>;

    /// Exact size in bytes of the serialized state.
    fn serialized_size(&self) -> usize;

    /// Serialize the set into the binary cell at `idx` in `output`.
    fn serialize(&self, output: &mut Array, idx: usize) -> Result<()>;

    /// Restore state from serialized bytes. The accumulator must be empty.
    fn deserialize(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release all memory held by the accumulator.
    fn free(&mut self);
}

/// Set accumulator for any supported datatype.
#[derive(Debug)]
pub enum AnySetAccumulator<B: BufferManager> {
    Boolean(ScalarSetAccumulator<PhysicalBool, B>),
    Int8(ScalarSetAccumulator<PhysicalI8, B>),
    Int16(ScalarSetAccumulator<PhysicalI16, B>),
    Int32(ScalarSetAccumulator<PhysicalI32, B>),
    Int64(ScalarSetAccumulator<PhysicalI64, B>),
    UInt8(ScalarSetAccumulator<PhysicalU8, B>),
    UInt16(ScalarSetAccumulator<PhysicalU16, B>),
    UInt32(ScalarSetAccumulator<PhysicalU32, B>),
    UInt64(ScalarSetAccumulator<PhysicalU64, B>),
    Float32(ScalarSetAccumulator<PhysicalF32, B>),
    Float64(ScalarSetAccumulator<PhysicalF64, B>),
    String(StringSetAccumulator<B>),
    Complex(ComplexSetAccumulator<B>),
}

impl<B> AnySetAccumulator<B>
where
    B: BufferManager,
{
    pub fn try_new(datatype: &DataType, manager: &B) -> Result<Self> {
        Self::try_new_with_config(datatype, manager, &AccumulatorConfig::default())
    }

    pub fn try_new_with_config(
        datatype: &DataType,
        manager: &B,
        config: &AccumulatorConfig,
    ) -> Result<Self> {
        trace!(
            %datatype,
            category = ?datatype.value_category(),
            capacity = config.initial_capacity,
            "creating set accumulator"
        );

        let cap = config.initial_capacity;
        Ok(match datatype.physical_type() {
            PhysicalType::Boolean => {
                Self::Boolean(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Int8 => Self::Int8(ScalarSetAccumulator::try_with_capacity(manager, cap)?),
            PhysicalType::Int16 => {
                Self::Int16(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Int32 => {
                Self::Int32(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Int64 => {
                Self::Int64(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::UInt8 => {
                Self::UInt8(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::UInt16 => {
                Self::UInt16(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::UInt32 => {
                Self::UInt32(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::UInt64 => {
                Self::UInt64(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Float32 => {
                Self::Float32(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Float64 => {
                Self::Float64(ScalarSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::Utf8 | PhysicalType::Binary => {
                Self::String(StringSetAccumulator::try_with_capacity(manager, cap)?)
            }
            PhysicalType::List | PhysicalType::Struct => Self::Complex(
                ComplexSetAccumulator::try_with_capacity(datatype.clone(), manager, cap)?,
            ),
        })
    }
}

macro_rules! dispatch {
    ($self:expr, $acc:ident => $body:expr) => {
        match $self {
            AnySetAccumulator::Boolean($acc) => $body,
            AnySetAccumulator::Int8($acc) => $body,
            AnySetAccumulator::Int16($acc) => $body,
            AnySetAccumulator::Int32($acc) => $body,
            AnySetAccumulator::Int64($acc) => $body,
            AnySetAccumulator::UInt8($acc) => $body,
            AnySetAccumulator::UInt16($acc) => $body,
            AnySetAccumulator::UInt32($acc) => $body,
            AnySetAccumulator::UInt64($acc) => $body,
            AnySetAccumulator::Float32($acc) => $body,
            AnySetAccumulator::Float64($acc) => $body,
            AnySetAccumulator::String($acc) => $body,
            AnySetAccumulator::Complex($acc) => $body,
        }
    };
}

impl<B> SetAccumulator for AnySetAccumulator<B>
where
    B: BufferManager,
{
    fn add_value(&mut self, input: &Array, row: usize) -> Result<()> {
        dispatch!(self, acc => acc.add_value(input, row))
    }

    fn add_values(&mut self, input: &Array, row: usize) -> Result<()> {
        dispatch!(self, acc => acc.add_values(input, row))
    }

    fn size(&self) -> usize {
        dispatch!(self, acc => acc.size())
    }

    fn null_index(&self) -> Option<i32> {
        dispatch!(self, acc => acc.null_index())
    }

    fn extract_values(&self, output: &mut Array, offset: usize) -> Result<usize> {
        dispatch!(self, acc => acc.extract_values(output, offset))
    }

    fn serialized_size(&self) -> usize {
        dispatch!(self, acc => acc.serialized_size())
    }

    fn serialize(&self, output: &mut Array, idx: usize) -> Result<()> {
        dispatch!(self, acc => acc.serialize(output, idx))
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        dispatch!(self, acc => acc.deserialize(bytes))
    }

    fn free(&mut self) {
        dispatch!(self, acc => acc.free())
    }
}

pub(crate) fn check_input_row(input: &Array, row: usize) -> Result<()> {
    if row >= input.len() {
        return Err(DbError::new("Input row out of bounds")
            .with_field("row", row)
            .with_field("len", input.len()));
    }
    Ok(())
}

pub(crate) fn check_output_len(output: &Array, offset: usize, size: usize) -> Result<()> {
    if offset + size > output.len() {
        return Err(DbError::new("Output too small for set values")
            .with_field("offset", offset)
            .with_field("size", size)
            .with_field("output_len", output.len()));
    }
    Ok(())
}

/// Reserve exactly `size` bytes in the binary cell at `idx` and hand them to
/// `write_fn`.
pub(crate) fn write_serialized<F>(output: &mut Array, idx: usize, size: usize, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut [u8]) -> Result<()>,
{
    if idx >= output.len() {
        return Err(DbError::new("Serialization output index out of bounds")
            .with_field("idx", idx)
            .with_field("len", output.len()));
    }
    output.string_buffer_mut()?.write_with(idx, size, write_fn)?;
    output.set_valid(idx)
}
