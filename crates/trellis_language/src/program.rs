//! Loaded program: types, rules, initial facts.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{TypeDefinition, Value};

use crate::ast::Expr;

/// A rule variable and its declared fact type, like `p: Person`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedVariable {
    /// Variable name.
    pub name: Arc<str>,
    /// Fact type the variable ranges over.
    pub type_name: Arc<str>,
}

impl TypedVariable {
    /// Creates a typed variable.
    #[must_use]
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: Arc::from(name),
            type_name: Arc::from(type_name),
        }
    }
}

impl fmt::Display for TypedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.type_name)
    }
}

/// One action invocation in a rule's action list.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    /// Handler name, like `print` or `Xuple`.
    pub name: Arc<str>,
    /// Unevaluated arguments.
    pub args: Vec<Expr>,
}

impl Job {
    /// Creates a job.
    #[must_use]
    pub fn new(name: &str, args: Vec<Expr>) -> Self {
        Self {
            name: Arc::from(name),
            args,
        }
    }
}

/// A production rule: `rule id: {vars} / condition ==> actions`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDefinition {
    /// Unique rule id.
    pub id: Arc<str>,
    /// Variables in declaration order.
    pub variables: Vec<TypedVariable>,
    /// Condition over the variables. `None` matches every combination.
    pub condition: Option<Expr>,
    /// Actions fired per activation, in order.
    pub actions: Vec<Job>,
}

impl RuleDefinition {
    /// Creates a rule with no condition and no actions.
    #[must_use]
    pub fn new(id: &str, variables: Vec<TypedVariable>) -> Self {
        Self {
            id: Arc::from(id),
            variables,
            condition: None,
            actions: Vec::new(),
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, job: Job) -> Self {
        self.actions.push(job);
        self
    }

    /// Returns the declared type of a variable.
    #[must_use]
    pub fn variable_type(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|v| &*v.name == name)
            .map(|v| &*v.type_name)
    }
}

/// A literal fact in the program's initial fact set.
#[derive(Clone, Debug, PartialEq)]
pub struct FactLiteral {
    /// Declared type.
    pub type_name: Arc<str>,
    /// Field values in source order.
    pub fields: Vec<(Arc<str>, Value)>,
}

impl FactLiteral {
    /// Creates an empty fact literal.
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: Arc::from(type_name),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.push((Arc::from(name), value.into()));
        self
    }
}

/// A whole program as produced by the rule parser.
///
/// Sections apply in this order on load: resets, types, rule removals, rules,
/// facts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    /// Type declarations.
    pub types: Vec<TypeDefinition>,
    /// Rules to add.
    pub rules: Vec<RuleDefinition>,
    /// Initial facts.
    pub facts: Vec<FactLiteral>,
    /// Rule ids to remove.
    pub rule_removals: Vec<Arc<str>>,
    /// True if the program starts with a `reset`.
    pub reset: bool,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type declaration.
    #[must_use]
    pub fn with_type(mut self, def: TypeDefinition) -> Self {
        self.types.push(def);
        self
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds an initial fact.
    #[must_use]
    pub fn with_fact(mut self, fact: FactLiteral) -> Self {
        self.facts.push(fact);
        self
    }
}
