//! Storage backends included in this crate.

mod memory_backend;

pub use memory_backend::{BytesHandle, MemoryBackend};
