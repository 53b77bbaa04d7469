//! Persistent fact index.
//!
//! Facts are indexed by identity and by type. Both maps are persistent, so
//! cloning an index is O(1) and clones share structure; transactions use this
//! for cheap snapshots.

use std::sync::Arc;

use im::{HashMap, OrdSet};
use trellis_foundation::{Fact, FactId, Value};

/// Fact storage indexed by identity and type.
#[derive(Clone, Debug, Default)]
pub struct FactIndex {
    by_id: HashMap<FactId, Arc<Fact>>,
    by_type: HashMap<Arc<str>, OrdSet<FactId>>,
}

impl FactIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fact, returning the fact previously stored under its identity.
    pub fn insert(&mut self, fact: Arc<Fact>) -> Option<Arc<Fact>> {
        let id = fact.id().clone();
        let previous = self.by_id.insert(id.clone(), Arc::clone(&fact));
        if let Some(old) = &previous {
            if old.type_name() != fact.type_name() {
                self.unindex_type(old.type_name(), &id);
            }
        }
        self.by_type
            .entry(Arc::from(fact.type_name()))
            .or_default()
            .insert(id);
        previous
    }

    /// Removes a fact by identity. Unknown identities are ignored.
    pub fn remove(&mut self, id: &FactId) -> Option<Arc<Fact>> {
        let removed = self.by_id.remove(id)?;
        self.unindex_type(removed.type_name(), id);
        Some(removed)
    }

    /// Returns the fact with the given identity.
    #[must_use]
    pub fn get(&self, id: &FactId) -> Option<&Arc<Fact>> {
        self.by_id.get(id)
    }

    /// Returns true if a fact with this identity is stored.
    #[must_use]
    pub fn contains(&self, id: &FactId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Returns all facts of a type, ordered by identity.
    #[must_use]
    pub fn facts_of_type(&self, type_name: &str) -> Vec<Arc<Fact>> {
        self.by_type
            .get(type_name)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Returns the facts of a type whose `field` equals `value`.
    #[must_use]
    pub fn facts_by_field(&self, type_name: &str, field: &str, value: &Value) -> Vec<Arc<Fact>> {
        self.facts_of_type(type_name)
            .into_iter()
            .filter(|f| f.get(field) == Some(value))
            .collect()
    }

    /// Returns the number of stored facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates over all stored facts in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.by_id.values()
    }

    fn unindex_type(&mut self, type_name: &str, id: &FactId) {
        let now_empty = match self.by_type.get_mut(type_name) {
            Some(ids) => {
                ids.remove(id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_type.remove(type_name);
        }
    }
}
