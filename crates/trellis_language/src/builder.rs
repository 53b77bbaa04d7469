//! Fluent construction of alpha conditions.
//!
//! ```
//! use trellis_language::ConditionBuilder;
//!
//! let p = ConditionBuilder::new("p");
//! let cond = ConditionBuilder::all([
//!     p.field_range("age", 18.0, 65.0),
//!     p.field_in("country", ["FR", "BE"]),
//! ]);
//! assert_eq!(
//!     cond.to_string(),
//!     r#"(((p.age >= 18) AND (p.age <= 65)) AND ((p.country == "FR") OR (p.country == "BE")))"#
//! );
//! ```

use std::sync::Arc;

use crate::ast::Expr;
use crate::operator::{BinaryOp, LogicalOp};

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

/// Builds conditions over the fields of one rule variable.
#[derive(Clone, Debug)]
pub struct ConditionBuilder {
    variable: Arc<str>,
}

impl ConditionBuilder {
    /// Creates a builder for `variable`.
    #[must_use]
    pub fn new(variable: &str) -> Self {
        Self {
            variable: Arc::from(variable),
        }
    }

    fn field(&self, field: &str) -> Expr {
        Expr::FieldAccess {
            object: Arc::clone(&self.variable),
            field: Arc::from(field),
        }
    }

    /// `v.field <op> value`.
    #[must_use]
    pub fn field_compare(&self, field: &str, op: BinaryOp, value: impl Into<Expr>) -> Expr {
        Expr::binary(op, self.field(field), value.into())
    }

    /// `v.field == value`.
    #[must_use]
    pub fn field_equals(&self, field: &str, value: impl Into<Expr>) -> Expr {
        self.field_compare(field, BinaryOp::Eq, value)
    }

    /// `v.field != value`.
    #[must_use]
    pub fn field_not_equals(&self, field: &str, value: impl Into<Expr>) -> Expr {
        self.field_compare(field, BinaryOp::Ne, value)
    }

    /// `v.field < value`.
    #[must_use]
    pub fn field_less_than(&self, field: &str, value: impl Into<Expr>) -> Expr {
        self.field_compare(field, BinaryOp::Lt, value)
    }

    /// `v.field > value`.
    #[must_use]
    pub fn field_greater_than(&self, field: &str, value: impl Into<Expr>) -> Expr {
        self.field_compare(field, BinaryOp::Gt, value)
    }

    /// `min <= v.field <= max`.
    #[must_use]
    pub fn field_range(&self, field: &str, min: impl Into<Expr>, max: impl Into<Expr>) -> Expr {
        Expr::logical(
            LogicalOp::And,
            self.field_compare(field, BinaryOp::Ge, min),
            self.field_compare(field, BinaryOp::Le, max),
        )
    }

    /// `v.field` equals one of `values`. An empty list is `false`.
    #[must_use]
    pub fn field_in<V: Into<Expr>>(&self, field: &str, values: impl IntoIterator<Item = V>) -> Expr {
        Self::any(values.into_iter().map(|v| self.field_equals(field, v)))
    }

    /// `v.field` equals none of `values`. An empty list is `true`.
    #[must_use]
    pub fn field_not_in<V: Into<Expr>>(
        &self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Expr {
        Self::all(values.into_iter().map(|v| self.field_not_equals(field, v)))
    }

    /// Conjunction. An empty list is `true`, a single condition is returned as is.
    #[must_use]
    pub fn all(conditions: impl IntoIterator<Item = Expr>) -> Expr {
        Self::chain(LogicalOp::And, conditions, true)
    }

    /// Disjunction. An empty list is `false`, a single condition is returned as is.
    #[must_use]
    pub fn any(conditions: impl IntoIterator<Item = Expr>) -> Expr {
        Self::chain(LogicalOp::Or, conditions, false)
    }

    /// Negation.
    #[must_use]
    pub fn not(condition: Expr) -> Expr {
        Expr::negate(condition)
    }

    fn chain(op: LogicalOp, conditions: impl IntoIterator<Item = Expr>, empty: bool) -> Expr {
        let mut iter = conditions.into_iter();
        let Some(first) = iter.next() else {
            return Expr::Bool(empty);
        };
        let operations: Vec<_> = iter.map(|c| (op, c)).collect();
        if operations.is_empty() {
            first
        } else {
            Expr::Logical {
                left: Box::new(first),
                operations,
            }
        }
    }
}
