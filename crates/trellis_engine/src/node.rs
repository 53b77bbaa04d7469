//! Network nodes and the edges between them.
//!
//! Nodes live in the network's arena keyed by [`NodeId`]. A node's id is a
//! hash of its structural signature, so two rules asking for the same node
//! (same parent, same test) get the same id and share it.
//!
//! Every node's [`WorkingMemory`] holds what the node has *emitted*: facts for
//! type nodes, passing tokens for alpha nodes, joined tokens for join nodes,
//! left tokens with a witness (or, negated, without one) for exists nodes, and
//! activations for terminal nodes.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::alpha::AlphaNode;
use crate::exists::{ExistsMemory, ExistsNode};
use crate::join::{JoinMemory, JoinNode};
use crate::memory::WorkingMemory;
use crate::token::Token;

/// Stable identifier derived from a node's signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Derives the id of a signature.
    #[must_use]
    pub fn of(signature: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        signature.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:016x}", self.0)
    }
}

/// Which input of a join an edge feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Left input (the growing chain). Single-input nodes use this side.
    Left,
    /// Right input (the variable being joined in).
    Right,
}

/// A parent-to-child connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Child node.
    pub target: NodeId,
    /// Input of the child.
    pub side: Side,
    /// Variable a type node binds its facts to when feeding this edge.
    pub variable: Option<Arc<str>>,
}

/// What a node does.
#[derive(Debug)]
pub enum NodeKind {
    /// Entry point; parent of every type node.
    Root,
    /// Accepts every fact of one type.
    Type {
        /// The fact type.
        type_name: Arc<str>,
    },
    /// Single-variable test.
    Alpha(AlphaNode),
    /// Two-input join.
    Join(JoinNode),
    /// Gate on an `EXISTS` or `NOT EXISTS` conjunct.
    Exists(ExistsNode),
    /// End of a rule; its memory holds the activations in force.
    Terminal {
        /// The rule.
        rule: Arc<str>,
    },
}

impl NodeKind {
    /// Short name used in logs and summaries.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Type { .. } => "type",
            Self::Alpha(alpha) => alpha.test.kind_name(),
            Self::Join(_) => "join",
            Self::Exists(exists) if exists.condition.negated => "not-exists",
            Self::Exists(_) => "exists",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// Saved memories of one node, for rollback.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    memory: WorkingMemory,
    join_inputs: Option<JoinMemory>,
    exists_inputs: Option<ExistsMemory>,
}

/// A node in the discrimination network.
#[derive(Debug)]
pub struct Node {
    /// Id, derived from the signature.
    pub id: NodeId,
    /// Structural signature.
    pub signature: String,
    /// Behaviour.
    pub kind: NodeKind,
    memory: RwLock<WorkingMemory>,
    successors: RwLock<Vec<Edge>>,
}

impl Node {
    /// Creates a node with empty memory and no successors.
    #[must_use]
    pub fn new(signature: String, kind: NodeKind) -> Self {
        Self {
            id: NodeId::of(&signature),
            signature,
            kind,
            memory: RwLock::new(WorkingMemory::new()),
            successors: RwLock::new(Vec::new()),
        }
    }

    /// Reads the output memory.
    pub fn memory(&self) -> RwLockReadGuard<'_, WorkingMemory> {
        self.memory.read()
    }

    /// Writes the output memory.
    pub fn memory_mut(&self) -> RwLockWriteGuard<'_, WorkingMemory> {
        self.memory.write()
    }

    /// Returns the join behaviour, if this is a join node.
    #[must_use]
    pub const fn as_join(&self) -> Option<&JoinNode> {
        match &self.kind {
            NodeKind::Join(join) => Some(join),
            _ => None,
        }
    }

    /// Returns the exists behaviour, if this is an exists node.
    #[must_use]
    pub const fn as_exists(&self) -> Option<&ExistsNode> {
        match &self.kind {
            NodeKind::Exists(exists) => Some(exists),
            _ => None,
        }
    }

    /// Returns the rule of a terminal node.
    #[must_use]
    pub fn terminal_rule(&self) -> Option<&Arc<str>> {
        match &self.kind {
            NodeKind::Terminal { rule } => Some(rule),
            _ => None,
        }
    }

    /// Returns the outgoing edges.
    #[must_use]
    pub fn successors(&self) -> Vec<Edge> {
        self.successors.read().clone()
    }

    /// Adds an edge. Returns false if it already existed.
    pub fn connect(&self, edge: Edge) -> bool {
        let mut successors = self.successors.write();
        if successors.contains(&edge) {
            return false;
        }
        successors.push(edge);
        true
    }

    /// Drops every edge into `target`.
    pub fn disconnect(&self, target: NodeId) {
        self.successors.write().retain(|e| e.target != target);
    }

    /// Returns the tokens this node has emitted.
    #[must_use]
    pub fn output_tokens(&self) -> Vec<Arc<Token>> {
        self.memory.read().tokens().cloned().collect()
    }

    /// Captures the node's memories.
    #[must_use]
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            memory: self.memory.read().clone(),
            join_inputs: self.as_join().map(JoinNode::inputs_snapshot),
            exists_inputs: self.as_exists().map(ExistsNode::inputs_snapshot),
        }
    }

    /// Restores memories captured by [`Node::snapshot`].
    pub fn restore(&self, snapshot: NodeSnapshot) {
        *self.memory.write() = snapshot.memory;
        if let (Some(join), Some(inputs)) = (self.as_join(), snapshot.join_inputs) {
            join.restore_inputs(inputs);
        }
        if let (Some(exists), Some(inputs)) = (self.as_exists(), snapshot.exists_inputs) {
            exists.restore_inputs(inputs);
        }
    }

    /// Empties every memory of this node.
    pub fn clear(&self) {
        self.memory.write().clear();
        if let Some(join) = self.as_join() {
            join.restore_inputs(JoinMemory::default());
        }
        if let Some(exists) = self.as_exists() {
            exists.restore_inputs(ExistsMemory::default());
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind.name(), self.id, self.signature)
    }
}
