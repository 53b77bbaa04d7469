//! Rule compilation: from a parsed rule to network-ready parts.
//!
//! The condition is split into top-level conjuncts and each conjunct is
//! classified by the rule variables it reads:
//! - none: a constant test, attached to the first variable's alpha path
//! - one: an alpha test on that variable, decomposed when it holds more than
//!   one arithmetic operation
//! - several: a join condition
//!
//! A top-level `EXISTS` or `NOT EXISTS` conjunct is kept apart whatever it
//! reads. It becomes an exists node after the joins, so that facts of the
//! quantified type arriving or leaving later update the rule's activations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use trellis_foundation::{Error, Result, TypeRegistry};
use trellis_language::{Expr, Job, RuleDefinition, TypedVariable, referenced_variables, split_conjuncts};

use crate::decompose::{DecomposedChain, decompose};

/// One alpha-side test of a variable.
#[derive(Clone, Debug, PartialEq)]
pub enum AlphaCondition {
    /// A test evaluated as written.
    Plain(Expr),
    /// A comparison split into atomic steps.
    Decomposed(DecomposedChain),
}

/// A quantified conjunct: some (or, negated, no) fact of `type_name` bound to
/// `variable` satisfies `condition`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistsCondition {
    /// Variable bound to each candidate fact.
    pub variable: Arc<str>,
    /// Type of the candidates.
    pub type_name: Arc<str>,
    /// Condition over the candidate and the rule's variables.
    pub condition: Expr,
    /// True for `NOT EXISTS`.
    pub negated: bool,
}

impl ExistsCondition {
    /// Recognizes `EXISTS (...)` and `NOT EXISTS (...)`.
    #[must_use]
    pub fn from_conjunct(conjunct: &Expr) -> Option<Self> {
        let (inner, negated) = match conjunct {
            Expr::Not(inner) => (&**inner, true),
            other => (other, false),
        };
        let Expr::Exists {
            variable,
            type_name,
            condition,
        } = inner
        else {
            return None;
        };
        Some(Self {
            variable: Arc::clone(variable),
            type_name: Arc::clone(type_name),
            condition: (**condition).clone(),
            negated,
        })
    }
}

impl fmt::Display for ExistsCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("NOT ")?;
        }
        write!(f, "EXISTS ({}: {} / {})", self.variable, self.type_name, self.condition)
    }
}

/// A rule ready to be wired into the network.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledRule {
    /// Rule id.
    pub id: Arc<str>,
    /// Variables, in declaration order.
    pub variables: Vec<TypedVariable>,
    /// Alpha tests per variable, in condition order.
    pub alpha: BTreeMap<Arc<str>, Vec<AlphaCondition>>,
    /// Conditions relating two or more variables.
    pub join_conditions: Vec<Expr>,
    /// Quantified conjuncts, applied after the joins in condition order.
    pub exists: Vec<ExistsCondition>,
    /// Action list.
    pub actions: Vec<Job>,
}

impl CompiledRule {
    /// Variable names, in declaration order.
    #[must_use]
    pub fn variable_names(&self) -> Vec<Arc<str>> {
        self.variables.iter().map(|v| Arc::clone(&v.name)).collect()
    }

    /// Decomposed chains, in variable then condition order.
    pub fn decompositions(&self) -> impl Iterator<Item = &DecomposedChain> {
        self.alpha.values().flatten().filter_map(|c| match c {
            AlphaCondition::Decomposed(chain) => Some(chain),
            AlphaCondition::Plain(_) => None,
        })
    }
}

/// Compiles a rule against the declared types.
///
/// # Errors
///
/// Returns `UnknownType` for an undeclared variable type, `UnboundVariable`
/// for a single-variable test or action argument naming an undeclared
/// variable, and `MalformedAst` for a rule without variables. An `EXISTS`
/// over an undeclared type is an `UnknownType` as well.
pub fn compile_rule(rule: &RuleDefinition, types: &TypeRegistry) -> Result<CompiledRule> {
    let Some(first) = rule.variables.first() else {
        return Err(Error::malformed(format!("rule {} declares no variables", rule.id)).in_rule(&*rule.id));
    };
    for var in &rule.variables {
        if types.get(&var.type_name).is_none() {
            return Err(Error::unknown_type(&*var.type_name).in_rule(&*rule.id));
        }
    }
    let names: Vec<Arc<str>> = rule.variables.iter().map(|v| Arc::clone(&v.name)).collect();
    let available = || names.iter().map(ToString::to_string).collect::<Vec<_>>();

    let mut alpha: BTreeMap<Arc<str>, Vec<AlphaCondition>> = BTreeMap::new();
    let mut join_conditions = Vec::new();
    let mut exists = Vec::new();
    let mut temps = 0usize;

    let conjuncts = rule.condition.as_ref().map(split_conjuncts).unwrap_or_default();
    for conjunct in conjuncts {
        let used = referenced_variables(&conjunct);
        if let Some(quantified) = ExistsCondition::from_conjunct(&conjunct) {
            if types.get(&quantified.type_name).is_none() {
                return Err(Error::unknown_type(&*quantified.type_name).in_rule(&*rule.id));
            }
            if let Some(unknown) = used.into_iter().find(|v| !names.contains(v)) {
                return Err(Error::unbound_variable(&*unknown, available()).in_rule(&*rule.id));
            }
            exists.push(quantified);
            continue;
        }
        match used.len() {
            0 => alpha
                .entry(Arc::clone(&first.name))
                .or_default()
                .push(AlphaCondition::Plain(conjunct)),
            1 => {
                let var = used.into_iter().next().unwrap_or_else(|| Arc::clone(&first.name));
                if !names.contains(&var) {
                    return Err(Error::unbound_variable(&*var, available()).in_rule(&*rule.id));
                }
                let condition = match decompose(&var, &conjunct, &mut temps) {
                    Some(chain) => AlphaCondition::Decomposed(chain),
                    None => AlphaCondition::Plain(conjunct),
                };
                alpha.entry(var).or_default().push(condition);
            }
            _ => join_conditions.push(conjunct),
        }
    }

    for job in &rule.actions {
        for arg in &job.args {
            if let Some(unknown) = referenced_variables(arg).into_iter().find(|v| !names.contains(v)) {
                return Err(Error::unbound_variable(&*unknown, available()).in_rule(&*rule.id));
            }
        }
    }

    Ok(CompiledRule {
        id: Arc::clone(&rule.id),
        variables: rule.variables.clone(),
        alpha,
        join_conditions,
        exists,
        actions: rule.actions.clone(),
    })
}
