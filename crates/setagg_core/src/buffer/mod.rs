pub mod arena;
pub mod buffer_manager;
