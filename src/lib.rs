//! Trellis - Incremental RETE pattern matching over typed facts
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: trellis_engine     - RETE network, joins, transactions, actions, metrics
//! Layer 2: trellis_language   - Expression AST, evaluator, JSON program ingestion
//! Layer 1: trellis_storage    - Pluggable fact store
//! Layer 0: trellis_foundation - Core types (Value, Fact, TypeDefinition, Error)
//! ```

pub use trellis_engine as engine;
pub use trellis_foundation as foundation;
pub use trellis_language as language;
pub use trellis_storage as storage;

pub use trellis_engine::{CommitReport, EngineConfig, Network, Transaction, TransactionOptions};
pub use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result, Value};
pub use trellis_storage::MemoryStorage;
