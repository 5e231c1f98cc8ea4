//! Durable, content-addressed local storage.
//!
//! This crate provides the local key/value contract for chunks and
//! manifests, keyed by [`ContentId`](brook_types::ContentId) string form:
//!
//! - [`ChunkStore`] — the storage trait shared by all backends.
//! - [`FileStore`] — one file per entry with hash-prefix directory sharding
//!   and write-to-temp-then-rename atomicity.
//! - [`MemoryStore`] — volatile backend for tests and memory-only nodes.
//!
//! Every write is verified against its identifier before it becomes
//! visible; the store never holds an entry whose key does not match the
//! hash of its value.

mod error;
mod file_store;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{ChunkStore, id_matches_data};
