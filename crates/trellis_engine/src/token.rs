//! Tokens: partial rule matches flowing through the network.
//!
//! A token is immutable. Extending one (an alpha step adding an intermediate
//! value, a join appending the right side's bindings) produces a new token that
//! points at its parent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_foundation::{BindingChain, Fact, FactId, Value};
use trellis_language::Locals;

use crate::node::NodeId;

/// Network-unique token serial number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Allocator of token serial numbers, owned by the network.
#[derive(Debug, Default)]
pub struct TokenIds(AtomicU64);

impl TokenIds {
    /// Returns the next serial number.
    pub fn allocate(&self) -> TokenId {
        TokenId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Content key of a token: its `(variable, fact)` pairs, oldest first.
///
/// Two tokens with the same key describe the same match, whatever path or
/// serial number produced them. Memories are keyed on this.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey(Arc<[(Arc<str>, FactId)]>);

impl TokenKey {
    /// Derives the key from a binding chain.
    #[must_use]
    pub fn of(bindings: &BindingChain) -> Self {
        let pairs: Vec<(Arc<str>, FactId)> = bindings
            .variables()
            .into_iter()
            .filter_map(|var| {
                let id = bindings.get(&var)?.id().clone();
                Some((var, id))
            })
            .collect();
        Self(pairs.into())
    }

    /// Returns the bound pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(Arc<str>, FactId)] {
        &self.0
    }

    /// Returns true if `id` is bound in this key.
    #[must_use]
    pub fn mentions(&self, id: &FactId) -> bool {
        self.0.iter().any(|(_, f)| f == id)
    }

    /// Returns the bound fact ids, oldest first.
    #[must_use]
    pub fn fact_ids(&self) -> Vec<FactId> {
        self.0.iter().map(|(_, id)| id.clone()).collect()
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, id)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var} → {id}")?;
        }
        write!(f, "}}")
    }
}

/// Provenance of a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMetadata {
    /// Node that created the token.
    pub created_by: NodeId,
    /// Number of joins the token has passed through.
    pub join_level: usize,
    /// Tokens it was derived from.
    pub parent_ids: Vec<TokenId>,
}

/// A partial match.
#[derive(Clone, Debug)]
pub struct Token {
    /// Serial number.
    pub id: TokenId,
    /// Content key.
    pub key: TokenKey,
    /// Facts bound along the path, in binding order.
    pub facts: Vec<Arc<Fact>>,
    /// Variable bindings.
    pub bindings: BindingChain,
    /// Intermediate arithmetic results carried with the match.
    pub locals: Locals,
    /// Node currently holding the token.
    pub node: NodeId,
    /// Token this one was derived from.
    pub parent: Option<Arc<Token>>,
    /// True if the token was produced by a join.
    pub is_join_result: bool,
    /// Provenance.
    pub metadata: TokenMetadata,
}

impl Token {
    /// Creates a token binding a single variable, as emitted by a type node.
    #[must_use]
    pub fn bind(id: TokenId, node: NodeId, variable: &str, fact: Arc<Fact>) -> Self {
        let bindings = BindingChain::single(variable, Arc::clone(&fact));
        Self {
            id,
            key: TokenKey::of(&bindings),
            facts: vec![fact],
            bindings,
            locals: Locals::new(),
            node,
            parent: None,
            is_join_result: false,
            metadata: TokenMetadata {
                created_by: node,
                join_level: 0,
                parent_ids: Vec::new(),
            },
        }
    }

    /// Derives a token carrying one more intermediate value.
    #[must_use]
    pub fn with_local(self: &Arc<Self>, id: TokenId, node: NodeId, name: &str, value: Value) -> Self {
        Self {
            id,
            key: self.key.clone(),
            facts: self.facts.clone(),
            bindings: self.bindings.clone(),
            locals: self.locals.update(Arc::from(name), value),
            node,
            parent: Some(Arc::clone(self)),
            is_join_result: self.is_join_result,
            metadata: TokenMetadata {
                created_by: node,
                join_level: self.metadata.join_level,
                parent_ids: vec![self.id],
            },
        }
    }

    /// Re-homes a token on another node, as an alpha filter does when it passes one.
    #[must_use]
    pub fn forwarded(self: &Arc<Self>, id: TokenId, node: NodeId) -> Self {
        Self {
            id,
            node,
            parent: Some(Arc::clone(self)),
            metadata: TokenMetadata {
                created_by: node,
                join_level: self.metadata.join_level,
                parent_ids: vec![self.id],
            },
            ..(**self).clone()
        }
    }

    /// Joins a left and right token: the left chain with the right bindings appended.
    #[must_use]
    pub fn join(id: TokenId, node: NodeId, left: &Arc<Self>, right: &Arc<Self>) -> Self {
        let bindings = left.bindings.merge(&right.bindings);
        let mut facts = left.facts.clone();
        facts.extend(right.facts.iter().cloned());
        let locals = left.locals.clone().union(right.locals.clone());
        Self {
            id,
            key: TokenKey::of(&bindings),
            facts,
            bindings,
            locals,
            node,
            parent: Some(Arc::clone(left)),
            is_join_result: true,
            metadata: TokenMetadata {
                created_by: node,
                join_level: left.metadata.join_level.max(right.metadata.join_level) + 1,
                parent_ids: vec![left.id, right.id],
            },
        }
    }

    /// Returns true if `id` is bound anywhere in this token.
    #[must_use]
    pub fn contains_fact(&self, id: &FactId) -> bool {
        self.key.mentions(id)
    }

    /// Returns the bound variables, oldest first.
    #[must_use]
    pub fn variables(&self) -> Vec<Arc<str>> {
        self.bindings.variables()
    }

    /// Walks the parent links, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Arc<Self>> {
        std::iter::successors(self.parent.as_ref(), |t| t.parent.as_ref())
    }
}
