//! Per-node working memory.
//!
//! Built on `im` persistent maps, so cloning a memory is O(1) and a clone taken
//! before a commit is a complete rollback snapshot.

use std::sync::Arc;

use im::OrdMap;
use trellis_foundation::{Fact, FactId};

use crate::token::{Token, TokenKey};

/// Facts and tokens held by one node.
#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    facts: OrdMap<FactId, Arc<Fact>>,
    tokens: OrdMap<TokenKey, Arc<Token>>,
}

impl WorkingMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Facts ---

    /// Stores a fact, returning the previous fact with the same identity.
    pub fn add_fact(&mut self, fact: Arc<Fact>) -> Option<Arc<Fact>> {
        self.facts.insert(fact.id().clone(), fact)
    }

    /// Removes a fact. Unknown identities are a no-op.
    pub fn remove_fact(&mut self, id: &FactId) -> Option<Arc<Fact>> {
        self.facts.remove(id)
    }

    /// Looks up a fact.
    #[must_use]
    pub fn get_fact(&self, id: &FactId) -> Option<&Arc<Fact>> {
        self.facts.get(id)
    }

    /// Returns the facts of one type, in identity order.
    #[must_use]
    pub fn facts_by_type(&self, type_name: &str) -> Vec<Arc<Fact>> {
        self.facts
            .values()
            .filter(|f| f.type_name() == type_name)
            .cloned()
            .collect()
    }

    /// Returns every fact, in identity order.
    pub fn facts(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.facts.values()
    }

    /// Returns the number of facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    // --- Tokens ---

    /// Stores a token, returning the token it replaces (same content key).
    pub fn add_token(&mut self, token: Arc<Token>) -> Option<Arc<Token>> {
        self.tokens.insert(token.key.clone(), token)
    }

    /// Removes a token by key.
    pub fn remove_token(&mut self, key: &TokenKey) -> Option<Arc<Token>> {
        self.tokens.remove(key)
    }

    /// Looks up a token by key.
    #[must_use]
    pub fn get_token(&self, key: &TokenKey) -> Option<&Arc<Token>> {
        self.tokens.get(key)
    }

    /// Returns the tokens binding any of `vars`, or every token when `vars` is empty.
    #[must_use]
    pub fn tokens_by_variable(&self, vars: &[&str]) -> Vec<Arc<Token>> {
        self.tokens
            .values()
            .filter(|t| vars.is_empty() || vars.iter().any(|v| t.bindings.has(v)))
            .cloned()
            .collect()
    }

    /// Removes and returns every token that binds `id`.
    pub fn remove_tokens_with_fact(&mut self, id: &FactId) -> Vec<Arc<Token>> {
        let doomed: Vec<TokenKey> = self
            .tokens
            .keys()
            .filter(|k| k.mentions(id))
            .cloned()
            .collect();
        doomed
            .iter()
            .filter_map(|k| self.tokens.remove(k))
            .collect()
    }

    /// Returns every token, in key order.
    pub fn tokens(&self) -> impl Iterator<Item = &Arc<Token>> {
        self.tokens.values()
    }

    /// Returns the number of tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if the memory holds neither facts nor tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.tokens.is_empty()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.facts = OrdMap::new();
        self.tokens = OrdMap::new();
    }
}
