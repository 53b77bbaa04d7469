//! Join nodes: combining partial matches from two inputs.
//!
//! Each side keeps its tokens and a hash index keyed on the values of the
//! equality conditions that relate the two sides (`l.user == u` indexes the
//! left side on `u` and the right side on `l.user`). A token arriving on one
//! side probes the other side's index, and every candidate pair is checked
//! against the remaining conditions on the merged binding chain.

use std::fmt;
use std::sync::Arc;

use im::{HashMap, OrdMap, OrdSet};
use parking_lot::RwLock;
use tracing::{trace, warn};
use trellis_foundation::{FactId, Result, Value};
use trellis_language::{BinaryOp, Evaluator, Expr, FactSource, PatternCache, referenced_variables};

use crate::node::{NodeId, Side};
use crate::token::{Token, TokenIds, TokenKey};

/// Shape of a join, for logs and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// The only join of a two-variable rule.
    Binary,
    /// One link of a left-deep chain over three or more variables.
    Cascade,
    /// Several variables joined in on the right at once.
    Multi,
}

impl JoinType {
    /// Classifies a join from its input widths and the rule's variable count.
    #[must_use]
    pub const fn classify(right_vars: usize, rule_vars: usize) -> Self {
        if right_vars > 1 {
            Self::Multi
        } else if rule_vars > 2 {
            Self::Cascade
        } else {
            Self::Binary
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Cascade => "cascade",
            Self::Multi => "multi",
        })
    }
}

type Index = HashMap<Vec<Value>, OrdSet<TokenKey>>;

/// Tokens waiting on each input, with their equi-join indices.
#[derive(Clone, Debug, Default)]
pub struct JoinMemory {
    left: OrdMap<TokenKey, Arc<Token>>,
    right: OrdMap<TokenKey, Arc<Token>>,
    left_index: Index,
    right_index: Index,
    left_keys: OrdMap<TokenKey, Vec<Value>>,
    right_keys: OrdMap<TokenKey, Vec<Value>>,
}

impl JoinMemory {
    #[allow(clippy::type_complexity)]
    fn side(
        &mut self,
        side: Side,
    ) -> (
        &mut OrdMap<TokenKey, Arc<Token>>,
        &mut Index,
        &mut OrdMap<TokenKey, Vec<Value>>,
    ) {
        match side {
            Side::Left => (&mut self.left, &mut self.left_index, &mut self.left_keys),
            Side::Right => (&mut self.right, &mut self.right_index, &mut self.right_keys),
        }
    }

    fn insert(&mut self, side: Side, token: Arc<Token>, key: Option<Vec<Value>>) {
        let (tokens, index, keys) = self.side(side);
        let tk = token.key.clone();
        if let Some(key) = key {
            let mut set = index.get(&key).cloned().unwrap_or_default();
            set.insert(tk.clone());
            index.insert(key.clone(), set);
            keys.insert(tk.clone(), key);
        }
        tokens.insert(tk, token);
    }

    fn remove_with_fact(&mut self, side: Side, id: &FactId) -> usize {
        let (tokens, index, keys) = self.side(side);
        let doomed: Vec<TokenKey> = tokens.keys().filter(|k| k.mentions(id)).cloned().collect();
        for tk in &doomed {
            tokens.remove(tk);
            if let Some(key) = keys.remove(tk) {
                if let Some(set) = index.get_mut(&key) {
                    set.remove(tk);
                    if set.is_empty() {
                        index.remove(&key);
                    }
                }
            }
        }
        doomed.len()
    }

    fn candidates(&self, side: Side, key: Option<&Vec<Value>>) -> Vec<Arc<Token>> {
        let (tokens, index) = match side {
            Side::Left => (&self.left, &self.left_index),
            Side::Right => (&self.right, &self.right_index),
        };
        match key {
            None => tokens.values().cloned().collect(),
            Some(key) => index
                .get(key)
                .into_iter()
                .flatten()
                .filter_map(|tk| tokens.get(tk).cloned())
                .collect(),
        }
    }

    /// Tokens held on the left input.
    #[must_use]
    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    /// Tokens held on the right input.
    #[must_use]
    pub fn right_len(&self) -> usize {
        self.right.len()
    }
}

/// Shared services a join activation needs.
pub struct JoinContext<'a> {
    /// Compiled LIKE/MATCHES patterns.
    pub patterns: &'a PatternCache,
    /// Candidate facts for `EXISTS`.
    pub facts: &'a dyn FactSource,
    /// Token serial numbers.
    pub ids: &'a TokenIds,
}

/// Result of one join activation.
#[derive(Debug, Default)]
pub struct JoinOutcome {
    /// Joined tokens to emit.
    pub emitted: Vec<Token>,
    /// Candidate pairs skipped because a condition failed to evaluate.
    pub failed: usize,
}

/// A two-input join.
#[derive(Debug)]
pub struct JoinNode {
    /// Variables bound by the left input.
    pub left_vars: Vec<Arc<str>>,
    /// Variables bound by the right input.
    pub right_vars: Vec<Arc<str>>,
    /// All join conditions.
    pub conditions: Vec<Expr>,
    /// Shape of the join.
    pub join_type: JoinType,
    equi: Vec<(Expr, Expr)>,
    residual: Vec<Expr>,
    inputs: RwLock<JoinMemory>,
}

impl JoinNode {
    /// Creates a join, splitting the conditions into index keys and residual tests.
    #[must_use]
    pub fn new(
        left_vars: Vec<Arc<str>>,
        right_vars: Vec<Arc<str>>,
        conditions: Vec<Expr>,
        join_type: JoinType,
    ) -> Self {
        let mut equi = Vec::new();
        let mut residual = Vec::new();
        for cond in &conditions {
            match equi_pair(cond, &left_vars, &right_vars) {
                Some(pair) => equi.push(pair),
                None => residual.push(cond.clone()),
            }
        }
        Self {
            left_vars,
            right_vars,
            conditions,
            join_type,
            equi,
            residual,
            inputs: RwLock::new(JoinMemory::default()),
        }
    }

    /// Number of conditions served by the hash index.
    #[must_use]
    pub fn equi_conditions(&self) -> usize {
        self.equi.len()
    }

    /// Structural description, used in the node signature.
    #[must_use]
    pub fn describe(&self) -> String {
        let conds: Vec<String> = self.conditions.iter().map(ToString::to_string).collect();
        format!(
            "[{}]|[{}]|{}",
            self.left_vars.join(","),
            self.right_vars.join(","),
            conds.join(" AND ")
        )
    }

    fn key_of(&self, side: Side, token: &Token, ctx: &JoinContext<'_>) -> Result<Option<Vec<Value>>> {
        if self.equi.is_empty() {
            return Ok(None);
        }
        let eval = Evaluator::new(&token.bindings, ctx.patterns)
            .with_locals(&token.locals)
            .with_facts(ctx.facts);
        let mut key = Vec::with_capacity(self.equi.len());
        for (left, right) in &self.equi {
            let expr = match side {
                Side::Left => left,
                Side::Right => right,
            };
            key.push(normalize(eval.evaluate(expr)?));
        }
        Ok(Some(key))
    }

    /// Accepts a token on one input and returns the joined tokens it completes.
    pub fn activate(
        &self,
        node: NodeId,
        side: Side,
        token: &Arc<Token>,
        ctx: &JoinContext<'_>,
    ) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();
        let key = match self.key_of(side, token, ctx) {
            Ok(key) => key,
            Err(err) => {
                warn!(node = %node, token = %token.key, error = %err, "join key could not be evaluated");
                outcome.failed += 1;
                self.inputs.write().side(side).0.insert(token.key.clone(), Arc::clone(token));
                return outcome;
            }
        };
        let other = match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        };
        let candidates = {
            let mut inputs = self.inputs.write();
            inputs.insert(side, Arc::clone(token), key.clone());
            inputs.candidates(other, key.as_ref())
        };
        trace!(node = %node, ?side, token = %token.key, candidates = candidates.len(), "join probe");

        for candidate in candidates {
            let (left, right) = match side {
                Side::Left => (token, &candidate),
                Side::Right => (&candidate, token),
            };
            if left.bindings.shares_variable_with(&right.bindings) {
                continue;
            }
            let joined = Token::join(ctx.ids.allocate(), node, left, right);
            match self.residual_holds(&joined, ctx) {
                Ok(true) => outcome.emitted.push(joined),
                Ok(false) => {}
                Err(err) => {
                    warn!(node = %node, token = %joined.key, error = %err, "join condition failed; pair skipped");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    fn residual_holds(&self, joined: &Token, ctx: &JoinContext<'_>) -> Result<bool> {
        let eval = Evaluator::new(&joined.bindings, ctx.patterns)
            .with_locals(&joined.locals)
            .with_facts(ctx.facts);
        for cond in &self.residual {
            if !eval.condition(cond)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drops input tokens binding `id`, returning how many were removed.
    pub fn retract(&self, id: &FactId) -> usize {
        let mut inputs = self.inputs.write();
        inputs.remove_with_fact(Side::Left, id) + inputs.remove_with_fact(Side::Right, id)
    }

    /// Clones the input memories.
    #[must_use]
    pub fn inputs_snapshot(&self) -> JoinMemory {
        self.inputs.read().clone()
    }

    /// Replaces the input memories.
    pub fn restore_inputs(&self, inputs: JoinMemory) {
        *self.inputs.write() = inputs;
    }

    /// Returns `(left, right)` input sizes.
    #[must_use]
    pub fn input_sizes(&self) -> (usize, usize) {
        let inputs = self.inputs.read();
        (inputs.left_len(), inputs.right_len())
    }
}

/// Splits `a == b` into `(left-side expr, right-side expr)` when each side reads
/// only one input.
fn equi_pair(cond: &Expr, left_vars: &[Arc<str>], right_vars: &[Arc<str>]) -> Option<(Expr, Expr)> {
    let Expr::Binary { op: BinaryOp::Eq, left, right } = cond else {
        return None;
    };
    let within = |expr: &Expr, vars: &[Arc<str>]| {
        let used = referenced_variables(expr);
        !used.is_empty() && used.iter().all(|v| vars.contains(v))
    };
    if within(left, left_vars) && within(right, right_vars) {
        Some(((**left).clone(), (**right).clone()))
    } else if within(left, right_vars) && within(right, left_vars) {
        Some(((**right).clone(), (**left).clone()))
    } else {
        None
    }
}

/// Maps values that compare equal to the same index key.
fn normalize(value: Value) -> Value {
    match value {
        Value::Fact(_) | Value::FactRef(_) => {
            let id = value.identity().map(Arc::<str>::from).unwrap_or_default();
            Value::String(id)
        }
        Value::Number(n) if n == 0.0 => Value::Number(0.0),
        other => other,
    }
}
