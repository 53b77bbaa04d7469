//! Expression traversal.
//!
//! [`ExprVisitor`] is a read-only visitor driven by [`walk_expr`]. The engine
//! uses the utility visitors below to find which rule variables a condition
//! touches, which decides whether it becomes an alpha filter or a join test.
//!
//! # Example
//!
//! ```
//! use trellis_language::{BinaryOp, Expr};
//! use trellis_language::visitor::referenced_variables;
//!
//! let cond = Expr::binary(BinaryOp::Eq, Expr::field("l", "user"), Expr::var("u"));
//! let vars: Vec<String> = referenced_variables(&cond).iter().map(|v| v.to_string()).collect();
//! assert_eq!(vars, ["l", "u"]);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::ast::Expr;
use crate::operator::LogicalOp;

// =============================================================================
// Read-Only Visitor
// =============================================================================

/// Trait for read-only expression visitors.
///
/// The default implementations do nothing. Use [`walk_expr`] to traverse.
#[allow(unused_variables)]
pub trait ExprVisitor {
    /// Called when entering any node, before its children.
    fn enter(&mut self, expr: &Expr) {}

    /// Called when leaving any node, after its children.
    fn leave(&mut self, expr: &Expr) {}

    /// Visit a variable reference.
    fn visit_variable(&mut self, name: &str) {}

    /// Visit a field access.
    fn visit_field_access(&mut self, object: &str, field: &str) {}

    /// Called before the condition of an `EXISTS` is walked.
    fn enter_exists(&mut self, variable: &str, type_name: &str) {}

    /// Called after the condition of an `EXISTS` is walked.
    fn leave_exists(&mut self, variable: &str, type_name: &str) {}
}

/// Walks an expression depth-first, left to right.
pub fn walk_expr<V: ExprVisitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    visitor.enter(expr);

    match expr {
        Expr::Number(_) | Expr::String(_) | Expr::Bool(_) => {}
        Expr::Variable(name) => visitor.visit_variable(name),
        Expr::FieldAccess { object, field } => visitor.visit_field_access(object, field),
        Expr::Binary { left, right, .. } => {
            walk_expr(visitor, left);
            walk_expr(visitor, right);
        }
        Expr::Logical { left, operations } => {
            walk_expr(visitor, left);
            for (_, right) in operations {
                walk_expr(visitor, right);
            }
        }
        Expr::Not(inner) | Expr::Cast { inner, .. } => walk_expr(visitor, inner),
        Expr::Exists {
            variable,
            type_name,
            condition,
        } => {
            visitor.enter_exists(variable, type_name);
            walk_expr(visitor, condition);
            visitor.leave_exists(variable, type_name);
        }
        Expr::FunctionCall { args, .. } | Expr::Array(args) => {
            for arg in args {
                walk_expr(visitor, arg);
            }
        }
        Expr::FactCreation { fields, .. } | Expr::InlineFact { fields, .. } => {
            for (_, value) in fields {
                walk_expr(visitor, value);
            }
        }
        Expr::FactModification {
            variable, value, ..
        } => {
            visitor.visit_variable(variable);
            walk_expr(visitor, value);
        }
        Expr::UpdateWithModifications {
            variable,
            modifications,
        } => {
            visitor.visit_variable(variable);
            for (_, value) in modifications {
                walk_expr(visitor, value);
            }
        }
    }

    visitor.leave(expr);
}

// =============================================================================
// Utility Visitors
// =============================================================================

/// Collects the free variables of an expression.
///
/// Variables bound by an enclosing `EXISTS` are not free.
#[derive(Debug, Default)]
pub struct VariableCollector {
    /// Free variables found, sorted.
    pub variables: BTreeSet<Arc<str>>,
    scoped: Vec<Arc<str>>,
}

impl VariableCollector {
    fn record(&mut self, name: &str) {
        if !self.scoped.iter().any(|s| &**s == name) {
            self.variables.insert(Arc::from(name));
        }
    }
}

impl ExprVisitor for VariableCollector {
    fn visit_variable(&mut self, name: &str) {
        self.record(name);
    }

    fn visit_field_access(&mut self, object: &str, _field: &str) {
        self.record(object);
    }

    fn enter_exists(&mut self, variable: &str, _type_name: &str) {
        self.scoped.push(Arc::from(variable));
    }

    fn leave_exists(&mut self, _variable: &str, _type_name: &str) {
        self.scoped.pop();
    }
}

/// Returns the free variables referenced by an expression.
#[must_use]
pub fn referenced_variables(expr: &Expr) -> BTreeSet<Arc<str>> {
    let mut collector = VariableCollector::default();
    walk_expr(&mut collector, expr);
    collector.variables
}

/// Collects `(variable, field)` pairs read by an expression.
#[derive(Debug, Default)]
pub struct FieldCollector {
    /// Fields read, in first-seen order, without duplicates.
    pub fields: Vec<(Arc<str>, Arc<str>)>,
}

impl ExprVisitor for FieldCollector {
    fn visit_field_access(&mut self, object: &str, field: &str) {
        if !self
            .fields
            .iter()
            .any(|(o, f)| &**o == object && &**f == field)
        {
            self.fields.push((Arc::from(object), Arc::from(field)));
        }
    }
}

/// Splits a condition into its top-level conjuncts.
///
/// Only a logical chain made entirely of `AND` is split; any `OR` in the chain
/// keeps it whole. Nested chains are flattened.
#[must_use]
pub fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    collect_conjuncts(expr, &mut out);
    out
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Logical { left, operations }
            if operations.iter().all(|(op, _)| *op == LogicalOp::And) =>
        {
            collect_conjuncts(left, out);
            for (_, right) in operations {
                collect_conjuncts(right, out);
            }
        }
        Expr::Bool(true) => {}
        other => out.push(other.clone()),
    }
}
