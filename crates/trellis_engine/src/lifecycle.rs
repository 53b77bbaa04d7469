//! Reference counting of shared nodes.
//!
//! Rules share alpha, join, and step nodes whenever their signatures match.
//! The manager is the only authority on when a shared node may be destroyed:
//! each rule holds one reference to every node it uses, and a node whose
//! count reaches zero is handed back to the network for removal.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Result};

use crate::node::NodeId;

#[derive(Clone, Debug, Default)]
struct NodeRefs {
    rules: BTreeSet<Arc<str>>,
}

/// Aggregate counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Nodes under management.
    pub nodes: usize,
    /// Rules holding references.
    pub rules: usize,
    /// Sum of all reference counts.
    pub references: usize,
    /// Nodes referenced by more than one rule.
    pub shared_nodes: usize,
}

/// Tracks which rules use which nodes.
#[derive(Debug, Default)]
pub struct LifecycleManager {
    nodes: HashMap<NodeId, NodeRefs>,
    by_rule: HashMap<Arc<str>, Vec<NodeId>>,
}

impl LifecycleManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `rule` uses `node`. Registering twice is a no-op.
    pub fn register(&mut self, node: NodeId, rule: &Arc<str>) {
        let refs = self.nodes.entry(node).or_default();
        if refs.rules.insert(Arc::clone(rule)) {
            self.by_rule.entry(Arc::clone(rule)).or_default().push(node);
        }
    }

    /// Drops every reference `rule` holds, returning the nodes left unreferenced.
    ///
    /// The returned nodes are forgotten by the manager and must be destroyed.
    pub fn unregister_rule(&mut self, rule: &str) -> Vec<NodeId> {
        let Some(nodes) = self.by_rule.remove(rule) else {
            return Vec::new();
        };
        let mut orphaned = Vec::new();
        for node in nodes {
            if let Some(refs) = self.nodes.get_mut(&node) {
                refs.rules.remove(rule);
                if refs.rules.is_empty() {
                    self.nodes.remove(&node);
                    orphaned.push(node);
                }
            }
        }
        orphaned
    }

    /// Returns the reference count of a node.
    #[must_use]
    pub fn ref_count(&self, node: NodeId) -> usize {
        self.nodes.get(&node).map_or(0, |r| r.rules.len())
    }

    /// Returns the rules using a node.
    #[must_use]
    pub fn rules_for_node(&self, node: NodeId) -> Vec<Arc<str>> {
        self.nodes
            .get(&node)
            .map(|r| r.rules.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the nodes a rule uses, in registration order.
    #[must_use]
    pub fn nodes_for_rule(&self, rule: &str) -> Vec<NodeId> {
        self.by_rule.get(rule).cloned().unwrap_or_default()
    }

    /// Returns true if no rule references `node`.
    #[must_use]
    pub fn can_remove_node(&self, node: NodeId) -> bool {
        self.ref_count(node) == 0
    }

    /// Forgets an unreferenced node.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NodeInUse`] while any rule references the node.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        let references = self.ref_count(node);
        if references > 0 {
            return Err(Error::new(ErrorKind::NodeInUse {
                node: node.to_string(),
                references,
            }));
        }
        self.nodes.remove(&node);
        Ok(())
    }

    /// Returns aggregate counts.
    #[must_use]
    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            nodes: self.nodes.len(),
            rules: self.by_rule.len(),
            references: self.nodes.values().map(|r| r.rules.len()).sum(),
            shared_nodes: self.nodes.values().filter(|r| r.rules.len() > 1).count(),
        }
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.by_rule.clear();
    }
}
