use crate::buffer::buffer_manager::TrackedBufferManager;

/// Configuration for memory used by set accumulators.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Max number of bytes that may be reserved across all accumulators
    /// sharing a buffer manager. No limit if None.
    pub memory_limit: Option<usize>,
}

impl MemoryConfig {
    /// Create a buffer manager enforcing the configured limit.
    pub fn buffer_manager(&self) -> TrackedBufferManager {
        TrackedBufferManager::new(self.memory_limit)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccumulatorConfig {
    /// Number of distinct values to reserve space for up front.
    pub initial_capacity: usize,
}
