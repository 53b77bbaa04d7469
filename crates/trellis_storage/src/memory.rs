//! In-memory storage backend.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_foundation::{Fact, FactId, Value};

use crate::backend::{Storage, StorageResult};
use crate::index::FactIndex;

/// The default backend: a [`FactIndex`] behind a readers-writer lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    index: RwLock<FactIndex>,
}

/// Serialized form of a [`MemoryStorage`] snapshot.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    facts: Vec<Fact>,
}

const SNAPSHOT_VERSION: u32 = 1;

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with facts.
    #[must_use]
    pub fn with_facts(facts: impl IntoIterator<Item = Fact>) -> Self {
        let mut index = FactIndex::new();
        for fact in facts {
            index.insert(Arc::new(fact));
        }
        Self {
            index: RwLock::new(index),
        }
    }

    /// Returns an O(1) snapshot of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> FactIndex {
        self.index.read().clone()
    }

    /// Replaces the contents with a snapshot.
    pub fn restore(&self, snapshot: FactIndex) {
        *self.index.write() = snapshot;
    }

    /// Returns the facts of a type whose `field` equals `value`.
    #[must_use]
    pub fn facts_by_field(&self, type_name: &str, field: &str, value: &Value) -> Vec<Arc<Fact>> {
        self.index.read().facts_by_field(type_name, field, value)
    }

    /// Encodes every stored fact as MessagePack.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn export(&self) -> StorageResult<Vec<u8>> {
        let index = self.index.read();
        let mut facts: Vec<Fact> = index.iter().map(|f| Fact::clone(f)).collect();
        facts.sort_by(|a, b| a.id().cmp(b.id()));
        let bytes = rmp_serde::to_vec(&Snapshot {
            version: SNAPSHOT_VERSION,
            facts,
        })?;
        debug!(facts = index.len(), bytes = bytes.len(), "exported memory storage");
        Ok(bytes)
    }

    /// Decodes a snapshot produced by [`MemoryStorage::export`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot.
    pub fn import(bytes: &[u8]) -> StorageResult<Self> {
        let snapshot: Snapshot = rmp_serde::from_slice(bytes)?;
        debug!(
            facts = snapshot.facts.len(),
            version = snapshot.version,
            "imported memory storage"
        );
        Ok(Self::with_facts(snapshot.facts))
    }
}

impl Storage for MemoryStorage {
    fn put(&self, fact: Arc<Fact>) -> StorageResult<Option<Arc<Fact>>> {
        Ok(self.index.write().insert(fact))
    }

    fn get(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn remove(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        Ok(self.index.write().remove(id))
    }

    fn facts_of_type(&self, type_name: &str) -> StorageResult<Vec<Arc<Fact>>> {
        Ok(self.index.read().facts_of_type(type_name))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.index.read().len())
    }

    fn clear(&self) -> StorageResult<()> {
        *self.index.write() = FactIndex::new();
        Ok(())
    }
}
