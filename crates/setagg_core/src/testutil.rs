//! Test utilities.
//!
//! Not behind a `#[cfg(test)]` flag so that it's usable from integration
//! tests.
//!
//! Should not be used outside of tests.

use crate::accumulator::SetAccumulator;
use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

/// Extract all values from an accumulator into a new array of the given type,
/// returning the values in ordinal order.
pub fn extract_all(acc: &impl SetAccumulator, datatype: &DataType) -> Vec<ScalarValue> {
    let mut output = Array::try_new(datatype, acc.size()).unwrap();
    let count = acc.extract_values(&mut output, 0).unwrap();
    assert_eq!(acc.size(), count, "extracted count differs from size");

    (0..count).map(|idx| output.get_value(idx).unwrap()).collect()
}

/// Serialize an accumulator into a single binary cell and return the bytes.
pub fn serialize_to_bytes(acc: &impl SetAccumulator) -> Vec<u8> {
    let mut output = Array::try_new(&DataType::Binary, 1).unwrap();
    acc.serialize(&mut output, 0).unwrap();
    let bytes = output.get_bytes(0).unwrap().to_vec();
    assert_eq!(
        acc.serialized_size(),
        bytes.len(),
        "serialized size differs from computed size"
    );
    bytes
}

/// Asserts that two accumulators hold the same values with the same ordinals.
pub fn assert_sets_eq(a: &impl SetAccumulator, b: &impl SetAccumulator, datatype: &DataType) {
    assert_eq!(a.size(), b.size(), "sizes differ");
    assert_eq!(a.null_index(), b.null_index(), "null indices differ");
    assert_eq!(extract_all(a, datatype), extract_all(b, datatype));
}
