//! Storage backend abstraction.
//!
//! The engine talks to fact storage only through [`Storage`]. Backends are
//! shared between threads, so all methods take `&self` and implementations
//! synchronize internally.

use std::sync::Arc;

use thiserror::Error;
use trellis_foundation::{Fact, FactId};

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Snapshot encoding failed.
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Snapshot decoding failed.
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl From<StorageError> for trellis_foundation::Error {
    fn from(err: StorageError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A fact store keyed by identity.
pub trait Storage: Send + Sync {
    /// Stores a fact, returning the previous fact with the same identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn put(&self, fact: Arc<Fact>) -> StorageResult<Option<Arc<Fact>>>;

    /// Reads a fact by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>>;

    /// Removes a fact by identity. Removing an unknown identity is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn remove(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>>;

    /// Returns all facts of the given type, ordered by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn facts_of_type(&self, type_name: &str) -> StorageResult<Vec<Arc<Fact>>>;

    /// Returns the number of stored facts.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if the store is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every fact.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn clear(&self) -> StorageResult<()>;

    /// Flushes pending writes so subsequent reads observe them.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn put(&self, fact: Arc<Fact>) -> StorageResult<Option<Arc<Fact>>> {
        (**self).put(fact)
    }

    fn get(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        (**self).get(id)
    }

    fn remove(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        (**self).remove(id)
    }

    fn facts_of_type(&self, type_name: &str) -> StorageResult<Vec<Arc<Fact>>> {
        (**self).facts_of_type(type_name)
    }

    fn len(&self) -> StorageResult<usize> {
        (**self).len()
    }

    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }

    fn sync(&self) -> StorageResult<()> {
        (**self).sync()
    }
}
