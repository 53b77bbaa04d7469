//! Pluggable fact storage for Trellis.
//!
//! This crate provides:
//! - [`Storage`] - The backend trait the engine submits facts through
//! - [`MemoryStorage`] - The default in-memory backend with MessagePack snapshots
//! - [`FactIndex`] - Persistent identity and type indices with O(1) snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod index;
pub mod memory;

pub use backend::{Storage, StorageError, StorageResult};
pub use index::FactIndex;
pub use memory::MemoryStorage;
