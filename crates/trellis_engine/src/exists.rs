//! Exists nodes: keeping `EXISTS` and `NOT EXISTS` conjuncts current.
//!
//! The left input carries the rule's partial matches, the right input every
//! fact of the quantified type. For each left token the node remembers which
//! right facts witness it. A positive node passes a left token on while it has
//! at least one witness, a negated node while it has none. Witnesses arriving
//! or leaving later move tokens into or out of the node's output.
//!
//! Passed tokens keep the left token's bindings; the quantified variable is
//! never bound downstream.

use std::sync::Arc;

use im::{OrdMap, OrdSet};
use parking_lot::RwLock;
use tracing::{trace, warn};
use trellis_foundation::{Fact, FactId, Result};
use trellis_language::Evaluator;

use crate::compiler::ExistsCondition;
use crate::join::JoinContext;
use crate::node::{NodeId, Side};
use crate::token::{Token, TokenIds, TokenKey};

/// Left tokens, candidate facts, and the witnesses of each left token.
#[derive(Clone, Debug, Default)]
pub struct ExistsMemory {
    left: OrdMap<TokenKey, Arc<Token>>,
    right: OrdMap<FactId, Arc<Fact>>,
    witnesses: OrdMap<TokenKey, OrdSet<FactId>>,
}

impl ExistsMemory {
    /// Tokens held on the left input.
    #[must_use]
    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    /// Candidate facts held on the right input.
    #[must_use]
    pub fn right_len(&self) -> usize {
        self.right.len()
    }

    /// Number of witnesses of a left token.
    #[must_use]
    pub fn witness_count(&self, key: &TokenKey) -> usize {
        self.witnesses.get(key).map_or(0, OrdSet::len)
    }
}

/// Result of one exists activation or retraction.
#[derive(Debug, Default)]
pub struct ExistsOutcome {
    /// Tokens that now pass.
    pub emitted: Vec<Token>,
    /// Keys of passed tokens that no longer pass.
    pub withdrawn: Vec<TokenKey>,
    /// Candidates skipped because the condition failed to evaluate.
    pub failed: usize,
}

impl ExistsOutcome {
    /// Returns true if nothing moved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty() && self.withdrawn.is_empty()
    }
}

/// A node gating its left input on a quantified condition.
#[derive(Debug)]
pub struct ExistsNode {
    /// The quantified conjunct.
    pub condition: ExistsCondition,
    inputs: RwLock<ExistsMemory>,
}

impl ExistsNode {
    /// Creates a node with empty inputs.
    #[must_use]
    pub fn new(condition: ExistsCondition) -> Self {
        Self {
            condition,
            inputs: RwLock::new(ExistsMemory::default()),
        }
    }

    /// Structural description, used in the node signature.
    #[must_use]
    pub fn describe(&self) -> String {
        self.condition.to_string()
    }

    const fn passes(&self, witnesses: usize) -> bool {
        (witnesses > 0) != self.condition.negated
    }

    fn witnessed_by(&self, left: &Token, fact: &Arc<Fact>, ctx: &JoinContext<'_>) -> Result<bool> {
        let bindings = left.bindings.add(&self.condition.variable, Arc::clone(fact));
        Evaluator::new(&bindings, ctx.patterns)
            .with_locals(&left.locals)
            .with_facts(ctx.facts)
            .condition(&self.condition.condition)
    }

    /// Accepts a token on one input and returns what it lets through or stops.
    pub fn activate(&self, node: NodeId, side: Side, token: &Arc<Token>, ctx: &JoinContext<'_>) -> ExistsOutcome {
        match side {
            Side::Left => self.activate_left(node, token, ctx),
            Side::Right => self.activate_right(node, token, ctx),
        }
    }

    fn activate_left(&self, node: NodeId, token: &Arc<Token>, ctx: &JoinContext<'_>) -> ExistsOutcome {
        let mut outcome = ExistsOutcome::default();
        let candidates: Vec<Arc<Fact>> = self.inputs.read().right.values().cloned().collect();
        let mut found = OrdSet::new();
        for fact in &candidates {
            match self.witnessed_by(token, fact, ctx) {
                Ok(true) => {
                    found.insert(fact.id().clone());
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(node = %node, token = %token.key, fact = %fact.id(), error = %err, "exists condition failed; candidate skipped");
                    outcome.failed += 1;
                }
            }
        }
        let count = found.len();
        {
            let mut inputs = self.inputs.write();
            inputs.left.insert(token.key.clone(), Arc::clone(token));
            inputs.witnesses.insert(token.key.clone(), found);
        }
        trace!(node = %node, token = %token.key, witnesses = count, "exists left");
        if self.passes(count) {
            outcome.emitted.push(token.forwarded(ctx.ids.allocate(), node));
        }
        outcome
    }

    fn activate_right(&self, node: NodeId, token: &Arc<Token>, ctx: &JoinContext<'_>) -> ExistsOutcome {
        let mut outcome = ExistsOutcome::default();
        let Some(fact) = token.bindings.get(&self.condition.variable).cloned() else {
            warn!(node = %node, token = %token.key, "exists input does not bind the quantified variable");
            return outcome;
        };
        let waiting: Vec<Arc<Token>> = {
            let mut inputs = self.inputs.write();
            inputs.right.insert(fact.id().clone(), Arc::clone(&fact));
            inputs.left.values().cloned().collect()
        };
        for left in waiting {
            match self.witnessed_by(&left, &fact, ctx) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(node = %node, token = %left.key, fact = %fact.id(), error = %err, "exists condition failed; candidate skipped");
                    outcome.failed += 1;
                    continue;
                }
            }
            let (before, after) = {
                let mut inputs = self.inputs.write();
                let mut set = inputs.witnesses.get(&left.key).cloned().unwrap_or_default();
                let before = set.len();
                set.insert(fact.id().clone());
                let after = set.len();
                inputs.witnesses.insert(left.key.clone(), set);
                (before, after)
            };
            self.shift(node, &left, before, after, ctx.ids, &mut outcome);
        }
        trace!(node = %node, fact = %fact.id(), emitted = outcome.emitted.len(), withdrawn = outcome.withdrawn.len(), "exists right");
        outcome
    }

    fn shift(
        &self,
        node: NodeId,
        left: &Arc<Token>,
        before: usize,
        after: usize,
        ids: &TokenIds,
        outcome: &mut ExistsOutcome,
    ) {
        match (self.passes(before), self.passes(after)) {
            (false, true) => outcome.emitted.push(left.forwarded(ids.allocate(), node)),
            (true, false) => outcome.withdrawn.push(left.key.clone()),
            _ => {}
        }
    }

    /// Drops a fact from both inputs.
    ///
    /// Left tokens binding `id` are forgotten; their passed tokens bind `id`
    /// too and go with the ordinary retraction. Left tokens that lose `id` as
    /// a witness are re-judged and reported in the outcome.
    pub fn retract(&self, node: NodeId, id: &FactId, ids: &TokenIds) -> ExistsOutcome {
        let mut outcome = ExistsOutcome::default();
        let mut inputs = self.inputs.write();
        let doomed: Vec<TokenKey> = inputs.left.keys().filter(|k| k.mentions(id)).cloned().collect();
        for key in &doomed {
            inputs.left.remove(key);
            inputs.witnesses.remove(key);
        }
        if inputs.right.remove(id).is_none() {
            return outcome;
        }
        let affected: Vec<TokenKey> = inputs
            .witnesses
            .iter()
            .filter(|(_, set)| set.contains(id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in affected {
            let Some(mut set) = inputs.witnesses.get(&key).cloned() else {
                continue;
            };
            let before = set.len();
            set.remove(id);
            let after = set.len();
            inputs.witnesses.insert(key.clone(), set);
            if let Some(left) = inputs.left.get(&key).cloned() {
                self.shift(node, &left, before, after, ids, &mut outcome);
            }
        }
        trace!(node = %node, fact = %id, withdrawn = outcome.withdrawn.len(), "exists witness retracted");
        outcome
    }

    /// Forgets a left token withdrawn upstream. Returns true if it was passing.
    pub fn withdraw(&self, key: &TokenKey) -> bool {
        let mut inputs = self.inputs.write();
        inputs.left.remove(key);
        inputs
            .witnesses
            .remove(key)
            .is_some_and(|set| self.passes(set.len()))
    }

    /// Clones the input memories.
    #[must_use]
    pub fn inputs_snapshot(&self) -> ExistsMemory {
        self.inputs.read().clone()
    }

    /// Replaces the input memories.
    pub fn restore_inputs(&self, inputs: ExistsMemory) {
        *self.inputs.write() = inputs;
    }

    /// Returns `(left, right)` input sizes.
    #[must_use]
    pub fn input_sizes(&self) -> (usize, usize) {
        let inputs = self.inputs.read();
        (inputs.left_len(), inputs.right_len())
    }
}
