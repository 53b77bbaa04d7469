//! Rule language for Trellis: expression AST, JSON ingestion, and evaluation.
//!
//! This crate provides:
//! - [`Expr`] - The expression tree shared by conditions and actions
//! - [`parse_program`] - Loading a program (types, rules, facts) from JSON
//! - [`Evaluator`] - Evaluating expressions against a binding chain
//! - [`ConditionBuilder`] - Building alpha conditions in code

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod builder;
pub mod cast;
pub mod eval;
pub mod functions;
pub mod ingest;
pub mod operator;
pub mod pattern;
pub mod program;
pub mod visitor;

pub use ast::{Expr, FieldInit};
pub use builder::ConditionBuilder;
pub use cast::cast;
pub use eval::{
    EvalMode, Evaluator, FactSource, Locals, apply_binary, arithmetic, compare_values,
    values_equal,
};
pub use ingest::{expr_from_json, parse_program, program_from_json};
pub use operator::{BinaryOp, CastType, Function, LogicalOp, decode_operator};
pub use pattern::{Dialect, PatternCache};
pub use program::{FactLiteral, Job, Program, RuleDefinition, TypedVariable};
pub use visitor::{ExprVisitor, referenced_variables, split_conjuncts, walk_expr};
