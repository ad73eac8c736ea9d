pub mod accumulator;
pub mod arrays;
pub mod buffer;
pub mod config;
pub mod hash;
pub mod stream;
pub mod testutil;
