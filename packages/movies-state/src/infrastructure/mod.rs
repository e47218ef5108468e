//! Infrastructure layer - State store adapters

#[cfg(feature = "json-file")]
pub mod json_file;
pub mod memory;

#[cfg(feature = "json-file")]
pub use json_file::JsonFileStateStore;
pub use memory::InMemoryStateStore;
