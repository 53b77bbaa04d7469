//! Beta-chain planning: which variable joins in when.
//!
//! A rule over `v0, v1, …, vn` becomes a left-deep cascade of joins. Each
//! link is a [`JoinPattern`]: the variables produced so far on the left, one
//! new variable on the right, and the join conditions that become decidable
//! once both are bound. Links are ordered by estimated selectivity when that
//! order keeps every condition decidable, and in declaration order otherwise.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;
use trellis_foundation::{Error, ErrorKind, Result};
use trellis_language::{Expr, referenced_variables};

use crate::dependency::{CircularDependencyDetector, ValidationReport};

/// Selectivity never drops below this.
pub const MIN_SELECTIVITY: f64 = 0.1;

/// One link of a beta chain.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinPattern {
    /// Variables bound by the left input.
    pub left_vars: Vec<Arc<str>>,
    /// Variables joined in from the right.
    pub right_vars: Vec<Arc<str>>,
    /// Conditions decided at this link.
    pub conditions: Vec<Expr>,
    /// Explicit selectivity, overriding the estimate.
    pub selectivity: Option<f64>,
}

impl JoinPattern {
    /// Creates a pattern without an explicit selectivity.
    #[must_use]
    pub fn new(left_vars: Vec<Arc<str>>, right_vars: Vec<Arc<str>>, conditions: Vec<Expr>) -> Self {
        Self {
            left_vars,
            right_vars,
            conditions,
            selectivity: None,
        }
    }

    /// Estimated fraction of candidate pairs that survive this link.
    ///
    /// Two variables start at 0.3, wider links at `0.4 + 0.1 * (n - 2)`, anything
    /// else at 0.5; each condition multiplies by 0.9, floored at 0.1.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn estimated_selectivity(&self) -> f64 {
        if let Some(s) = self.selectivity {
            return s;
        }
        let n = self.left_vars.len() + self.right_vars.len();
        let base = match n {
            2 => 0.3,
            n if n > 2 => 0.1f64.mul_add((n - 2) as f64, 0.4),
            _ => 0.5,
        };
        (base * 0.9f64.powi(self.conditions.len() as i32)).max(MIN_SELECTIVITY)
    }

    /// Variables the conditions read.
    #[must_use]
    pub fn required_variables(&self) -> BTreeSet<Arc<str>> {
        self.conditions.iter().flat_map(referenced_variables).collect()
    }

    fn cache_segment(&self) -> String {
        format!("[{}]|[{}]", self.left_vars.join(","), self.right_vars.join(","))
    }
}

/// The ordered links of one rule's beta chain.
#[derive(Clone, Debug, PartialEq)]
pub struct BetaPlan {
    /// Rule being built.
    pub rule: Arc<str>,
    /// Variable at the head of the chain.
    pub first: Arc<str>,
    /// Links, in wiring order.
    pub patterns: Vec<JoinPattern>,
    /// True if the selectivity order differs from declaration order.
    pub reordered: bool,
    /// Check of the variable production order.
    pub report: ValidationReport,
}

impl BetaPlan {
    /// Prefix-cache key after each link: `rule::[l0]|[r0]|[l1]|[r1]|…`.
    ///
    /// Every segment ends in `|`, so no key is a string prefix of a longer
    /// link's key unless it is that link's chain prefix.
    #[must_use]
    pub fn prefix_keys(&self) -> Vec<String> {
        let mut key = format!("{}::", self.rule);
        let mut out = Vec::with_capacity(self.patterns.len());
        for pattern in &self.patterns {
            key.push_str(&pattern.cache_segment());
            key.push('|');
            out.push(key.clone());
        }
        out
    }
}

/// Plans the joins of a rule over `variables` with multi-variable `conditions`.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidBetaChain`] if a condition reads a variable the
/// rule never binds, or [`ErrorKind::CircularDependency`] if the production
/// order is cyclic.
pub fn plan_joins(rule: &str, variables: &[Arc<str>], conditions: &[Expr]) -> Result<BetaPlan> {
    let Some(first) = variables.first() else {
        return Err(Error::malformed(format!("rule {rule} declares no variables")));
    };
    for cond in conditions {
        if let Some(unknown) = referenced_variables(cond)
            .into_iter()
            .find(|v| !variables.contains(v))
        {
            return Err(Error::new(ErrorKind::InvalidBetaChain {
                rule: rule.to_string(),
                variable: unknown.to_string(),
            }));
        }
    }

    let declared = declared_patterns(variables, conditions);
    let mut order: Vec<usize> = (0..declared.len()).collect();
    order.sort_by(|a, b| {
        declared[*a]
            .estimated_selectivity()
            .total_cmp(&declared[*b].estimated_selectivity())
    });
    let reordered = order.iter().enumerate().any(|(i, j)| i != *j);
    let patterns = if reordered {
        match rewire(first, &declared, &order) {
            Some(sorted) => sorted,
            None => {
                debug!(rule, "selectivity order breaks condition dependencies; keeping declared order");
                declared
            }
        }
    } else {
        declared
    };
    let reordered = patterns
        .iter()
        .zip(variables.iter().skip(1))
        .any(|(p, v)| p.right_vars.first() != Some(v));

    let report = production_graph(first, &patterns).validate().into_result()?;
    Ok(BetaPlan {
        rule: Arc::from(rule),
        first: Arc::clone(first),
        patterns,
        reordered,
        report,
    })
}

/// One link per variable after the first; each condition lands on the first
/// link where all its variables are bound.
fn declared_patterns(variables: &[Arc<str>], conditions: &[Expr]) -> Vec<JoinPattern> {
    let mut assigned = vec![false; conditions.len()];
    let mut produced: Vec<Arc<str>> = variables.iter().take(1).cloned().collect();
    let mut patterns = Vec::new();
    for var in variables.iter().skip(1) {
        let mut conds = Vec::new();
        for (i, cond) in conditions.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            let needed = referenced_variables(cond);
            if needed.iter().all(|v| produced.contains(v) || v == var) {
                assigned[i] = true;
                conds.push(cond.clone());
            }
        }
        patterns.push(JoinPattern::new(produced.clone(), vec![Arc::clone(var)], conds));
        produced.push(Arc::clone(var));
    }
    patterns
}

/// Rebuilds the links in `order`, or `None` if some condition would be read
/// before its variables are bound.
fn rewire(first: &Arc<str>, declared: &[JoinPattern], order: &[usize]) -> Option<Vec<JoinPattern>> {
    let mut produced = vec![Arc::clone(first)];
    let mut out = Vec::with_capacity(order.len());
    for &i in order {
        let pattern = &declared[i];
        let ready = pattern
            .required_variables()
            .iter()
            .all(|v| produced.contains(v) || pattern.right_vars.contains(v));
        if !ready {
            return None;
        }
        out.push(JoinPattern {
            left_vars: produced.clone(),
            ..pattern.clone()
        });
        produced.extend(pattern.right_vars.iter().cloned());
    }
    Some(out)
}

/// Each joined variable depends on the variables its conditions read.
fn production_graph(first: &str, patterns: &[JoinPattern]) -> CircularDependencyDetector {
    let mut graph = CircularDependencyDetector::new();
    graph.add_node(first, &[]);
    for pattern in patterns {
        let needs = pattern.required_variables();
        for var in &pattern.right_vars {
            let deps: Vec<&str> = needs.iter().filter(|v| *v != var).map(|v| &**v).collect();
            graph.add_node(var, &deps);
        }
    }
    graph
}
