use std::hash::{BuildHasher, Hash};

use ahash::RandomState;

/// State used for all hashing in accumulators.
///
/// Seeds are fixed so that hashes carried in serialized state remain valid when
/// the state is read back in on the same host.
pub const RANDOM_STATE: RandomState = RandomState::with_seeds(0, 0, 0, 0);

#[inline]
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    RANDOM_STATE.hash_one(value)
}

#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    RANDOM_STATE.hash_one(bytes)
}
