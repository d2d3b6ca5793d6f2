//! ETag index storage for devcache.
//!
//! This crate holds the path -> validator mapping that survives dev server
//! restarts. It offers a trait-based API with pluggable backends.
//!
//! Currently supported backends:
//! - JSON file (the default, one object per project)
//! - In-memory (tests and ephemeral servers)

mod error;
mod index;
mod json_file;
mod memory;
mod store;

pub use error::CacheError;
pub use index::CacheIndex;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use store::IndexStore;
