//! Expression tree for rule conditions and action arguments.
//!
//! [`Expr`] is a closed enum. The JSON produced by the rule parser uses several
//! spellings for the same node (`binaryOp`, `comparison`, Base64 operators, ...);
//! those collapse in [`crate::ingest`], so every consumer matches on exactly one
//! shape per construct.
//!
//! `Display` renders a canonical, fully parenthesized form. The engine uses it
//! as the structural signature when deduplicating alpha and join nodes.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::format_number;

use crate::operator::{BinaryOp, CastType, Function, LogicalOp};

/// A name/expression pair in fact constructors and modification lists.
pub type FieldInit = (Arc<str>, Expr);

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Number literal like `42` or `3.5`
    Number(f64),
    /// String literal like `"hello"`
    String(Arc<str>),
    /// `true` or `false`
    Bool(bool),
    /// Reference to a rule variable like `p`
    Variable(Arc<str>),
    /// Field read like `p.age`
    FieldAccess {
        /// Variable holding the fact.
        object: Arc<str>,
        /// Field name.
        field: Arc<str>,
    },
    /// Arithmetic or comparison like `p.age >= 18`
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Left-associative chain like `a AND b OR c`
    Logical {
        /// First operand.
        left: Box<Expr>,
        /// Remaining connectives and operands, applied in order.
        operations: Vec<(LogicalOp, Expr)>,
    },
    /// `NOT expr`
    Not(Box<Expr>),
    /// `EXISTS (v: Type / condition)`
    Exists {
        /// Variable bound to each candidate fact.
        variable: Arc<str>,
        /// Type of the candidates.
        type_name: Arc<str>,
        /// Condition a candidate must satisfy.
        condition: Box<Expr>,
    },
    /// Explicit conversion like `(number) s.code`
    Cast {
        /// Target type.
        target: CastType,
        /// Converted expression.
        inner: Box<Expr>,
    },
    /// Built-in call like `UPPER(p.name)`
    FunctionCall {
        /// The function.
        function: Function,
        /// Arguments in call order.
        args: Vec<Expr>,
    },
    /// Array literal like `["a", "b"]`
    Array(Vec<Expr>),
    /// New fact in an action like `Alert(level: "HIGH")`
    FactCreation {
        /// Declared type of the new fact.
        type_name: Arc<str>,
        /// Field initializers.
        fields: Vec<FieldInit>,
    },
    /// Fact literal passed as an action argument.
    InlineFact {
        /// Declared type of the new fact.
        type_name: Arc<str>,
        /// Field initializers.
        fields: Vec<FieldInit>,
    },
    /// Copy of a bound fact with one field replaced.
    FactModification {
        /// Variable holding the original fact.
        variable: Arc<str>,
        /// Field to overwrite.
        field: Arc<str>,
        /// New value.
        value: Box<Expr>,
    },
    /// Copy of a bound fact with several fields replaced, identity preserved.
    UpdateWithModifications {
        /// Variable holding the original fact.
        variable: Arc<str>,
        /// Fields to overwrite.
        modifications: Vec<FieldInit>,
    },
}

impl Expr {
    /// Creates a field access node.
    #[must_use]
    pub fn field(object: &str, field: &str) -> Self {
        Self::FieldAccess {
            object: Arc::from(object),
            field: Arc::from(field),
        }
    }

    /// Creates a variable reference.
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self::Variable(Arc::from(name))
    }

    /// Creates a string literal.
    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Creates a binary node.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Creates a two-operand logical node.
    #[must_use]
    pub fn logical(op: LogicalOp, left: Self, right: Self) -> Self {
        Self::Logical {
            left: Box::new(left),
            operations: vec![(op, right)],
        }
    }

    /// Negates an expression.
    #[must_use]
    pub fn negate(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Returns true for literal nodes.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Number(_) | Self::String(_) | Self::Bool(_))
    }

    /// Returns true for constructs only meaningful as action arguments.
    #[must_use]
    pub const fn is_action_only(&self) -> bool {
        matches!(
            self,
            Self::FactCreation { .. }
                | Self::InlineFact { .. }
                | Self::FactModification { .. }
                | Self::UpdateWithModifications { .. }
        )
    }

    /// Returns the variable this expression reads a field of, if it is a field access.
    #[must_use]
    pub fn field_object(&self) -> Option<&str> {
        match self {
            Self::FieldAccess { object, .. } => Some(object),
            _ => None,
        }
    }

    /// Counts binary arithmetic operators in this subtree.
    #[must_use]
    pub fn arithmetic_op_count(&self) -> usize {
        match self {
            Self::Binary { op, left, right } => {
                usize::from(op.is_arithmetic())
                    + left.arithmetic_op_count()
                    + right.arithmetic_op_count()
            }
            Self::Cast { inner, .. } | Self::Not(inner) => inner.arithmetic_op_count(),
            Self::FunctionCall { args, .. } | Self::Array(args) => {
                args.iter().map(Self::arithmetic_op_count).sum()
            }
            _ => 0,
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[FieldInit]) -> fmt::Result {
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name}: {value}")?;
    }
    Ok(())
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::FieldAccess { object, field } => write!(f, "{object}.{field}"),
            Self::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::Logical { left, operations } => {
                write!(f, "({left}")?;
                for (op, right) in operations {
                    write!(f, " {op} {right}")?;
                }
                write!(f, ")")
            }
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::Exists {
                variable,
                type_name,
                condition,
            } => write!(f, "EXISTS ({variable}: {type_name} / {condition})"),
            Self::Cast { target, inner } => write!(f, "({target}) {inner}"),
            Self::FunctionCall { function, args } => {
                write!(f, "{function}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Self::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Self::FactCreation { type_name, fields } | Self::InlineFact { type_name, fields } => {
                write!(f, "{type_name}(")?;
                write_fields(f, fields)?;
                write!(f, ")")
            }
            Self::FactModification {
                variable,
                field,
                value,
            } => write!(f, "{variable}[{field}] = {value}"),
            Self::UpdateWithModifications {
                variable,
                modifications,
            } => {
                write!(f, "{variable}{{")?;
                write_fields(f, modifications)?;
                write!(f, "}}")
            }
        }
    }
}
