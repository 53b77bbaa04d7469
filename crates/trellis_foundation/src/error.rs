//! Error types for the Trellis engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::fact::FactId;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attaches the rule being evaluated, creating a context if needed.
    #[must_use]
    pub fn in_rule(mut self, rule: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default();
        self.context = Some(context.with_rule(rule));
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates an unbound variable error listing the variables that were available.
    #[must_use]
    pub fn unbound_variable(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::new(ErrorKind::UnboundVariable {
            name: name.into(),
            available,
        })
    }

    /// Creates a missing field error.
    #[must_use]
    pub fn missing_field(fact: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingField {
            fact: fact.into(),
            field: field.into(),
        })
    }

    /// Creates an invalid operands error for a binary operator.
    #[must_use]
    pub fn invalid_operands(
        operator: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::InvalidOperands {
            operator: operator.into(),
            left: left.into(),
            right: right.into(),
        })
    }

    /// Creates a cast failure error.
    #[must_use]
    pub fn cast_failed(value: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(ErrorKind::CastFailed {
            value: value.into(),
            target: target.into(),
        })
    }

    /// Creates an unsupported operator error.
    #[must_use]
    pub fn unsupported_operator(operator: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedOperator(operator.into()))
    }

    /// Creates a malformed AST error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedAst(message.into()))
    }

    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates a fact validation error.
    #[must_use]
    pub fn fact_validation(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FactValidation {
            type_name: type_name.into(),
            message: message.into(),
        })
    }

    /// Creates a circular dependency error carrying the cycle path.
    #[must_use]
    pub fn circular_dependency(path: Vec<String>) -> Self {
        Self::new(ErrorKind::CircularDependency { path })
    }

    /// Creates a storage backend error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Returns true if this error was raised by the evaluator while
    /// looking up a variable that is not bound.
    #[must_use]
    pub const fn is_unbound_variable(&self) -> bool {
        matches!(self.kind, ErrorKind::UnboundVariable { .. })
    }
}

/// Categorized error kinds.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Type mismatch during runtime type checking.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: String,
        /// The actual type encountered.
        actual: String,
    },

    /// Variable referenced by an expression is not bound.
    #[error("unbound variable '{name}' (available: [{}])", .available.join(", "))]
    UnboundVariable {
        /// The variable name.
        name: String,
        /// Variables bound at the time of the lookup.
        available: Vec<String>,
    },

    /// Field not present on a fact.
    #[error("field '{field}' not found on fact {fact}")]
    MissingField {
        /// The fact identity or variable.
        fact: String,
        /// The missing field.
        field: String,
    },

    /// Operator applied to operands it does not accept.
    #[error(
        "operator '{operator}' cannot combine {left} and {right}; use an explicit cast"
    )]
    InvalidOperands {
        /// The operator.
        operator: String,
        /// Kind of the left operand.
        left: String,
        /// Kind of the right operand.
        right: String,
    },

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Modulo by zero.
    #[error("modulo by zero")]
    ModuloByZero,

    /// Cast could not convert the value.
    #[error("cannot cast {value} to {target}")]
    CastFailed {
        /// Display form of the source value.
        value: String,
        /// Target type name.
        target: String,
    },

    /// Operator not recognized.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Function name not recognized.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments to function.
    #[error("arity mismatch for {function}: expected {expected}, got {actual}")]
    ArityMismatch {
        /// Function name.
        function: String,
        /// Description of expected arity.
        expected: String,
        /// Actual number of arguments.
        actual: usize,
    },

    /// AST node is structurally invalid.
    #[error("malformed expression: {0}")]
    MalformedAst(String),

    /// Type name is not declared.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Fact fields do not satisfy the type definition.
    #[error("invalid {type_name} fact: {message}")]
    FactValidation {
        /// The fact type.
        type_name: String,
        /// What failed.
        message: String,
    },

    /// Fact with the given identity does not exist.
    #[error("fact not found: {0}")]
    FactNotFound(FactId),

    /// Dependency graph contains a cycle.
    #[error("circular dependency: {}", .path.join(" → "))]
    CircularDependency {
        /// Nodes on the cycle, starting and ending with the same name.
        path: Vec<String>,
    },

    /// Dependency graph references an undeclared node.
    #[error("invalid dependency graph: {0}")]
    InvalidDependencies(String),

    /// A join chain references a variable no upstream node produces.
    #[error("invalid beta chain for rule {rule}: variable '{variable}' is produced nowhere")]
    InvalidBetaChain {
        /// Rule being built.
        rule: String,
        /// Offending variable.
        variable: String,
    },

    /// Rule with this id already exists.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// Rule with this id does not exist.
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    /// Node still referenced by at least one rule.
    #[error("node {node} still has {references} reference(s)")]
    NodeInUse {
        /// Node id.
        node: String,
        /// Remaining reference count.
        references: usize,
    },

    /// Fact read back from storage did not match what was submitted.
    #[error("verification failed for {fact} after {attempts} attempt(s)")]
    VerificationFailed {
        /// Fact identity.
        fact: FactId,
        /// Number of verification attempts made.
        attempts: u32,
    },

    /// Transaction exceeded its submission timeout.
    #[error("submission timed out after {elapsed_ms}ms")]
    SubmissionTimeout {
        /// Milliseconds elapsed when the timeout was detected.
        elapsed_ms: u128,
    },

    /// Transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,

    /// Network was shut down.
    #[error("network is shut down")]
    NetworkShutdown,

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum rule activations per commit exceeded.
    MaxActivations {
        /// The configured limit.
        limit: usize,
        /// Additional context about which rule(s) caused the issue.
        context: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxActivations { limit, context } => {
                write!(f, "max activations ({limit}) exceeded")?;
                if let Some(ctx) = context {
                    write!(f, ": {ctx}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule being evaluated.
    pub rule: Option<String>,
    /// Node that raised the error.
    pub node: Option<String>,
    /// Fact being processed.
    pub fact: Option<FactId>,
    /// Chain of enclosing operations, innermost last.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Sets the node.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Sets the fact.
    #[must_use]
    pub fn with_fact(mut self, fact: FactId) -> Self {
        self.fact = Some(fact);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
        }
        if let Some(node) = &self.node {
            write!(f, " at node {node}")?;
        }
        if let Some(fact) = &self.fact {
            write!(f, " for {fact}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}

/// Result type alias for Trellis operations.
pub type Result<T> = std::result::Result<T, Error>;
