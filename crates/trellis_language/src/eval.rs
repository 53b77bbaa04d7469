//! Expression evaluation over a binding chain.
//!
//! One [`Evaluator`] serves both contexts a rule needs:
//! - condition context ([`Evaluator::condition`]), producing a `bool`
//! - value context ([`Evaluator::evaluate`]), producing a [`Value`]
//!
//! Join planning evaluates conditions before every variable is bound. In
//! [`EvalMode::PartialForJoinPlanning`] an unbound reference is *unknown*
//! rather than an error, and unknown propagates through operators using
//! three-valued logic. [`Evaluator::partial_condition`] exposes that as
//! `Option<bool>`.

use std::sync::Arc;

use trellis_foundation::im::OrdMap;
use trellis_foundation::{BindingChain, Error, ErrorKind, Fact, Result, Value};

use crate::ast::Expr;
use crate::cast::cast;
use crate::functions;
use crate::operator::{BinaryOp, LogicalOp};
use crate::pattern::{Dialect, PatternCache};

/// How unbound variables are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvalMode {
    /// Unbound variables are errors.
    #[default]
    Strict,
    /// Unbound variables are unknown; unknown propagates.
    PartialForJoinPlanning,
}

/// Source of candidate facts for `EXISTS`.
pub trait FactSource {
    /// Returns the facts of a type currently asserted.
    fn facts_of_type(&self, type_name: &str) -> Vec<Arc<Fact>>;
}

/// Values of named intermediates, such as decomposed arithmetic temps.
pub type Locals = OrdMap<Arc<str>, Value>;

/// Evaluates expressions against a binding chain.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trellis_foundation::{BindingChain, Fact, FactId};
/// use trellis_language::{BinaryOp, Evaluator, Expr, PatternCache};
///
/// let person = Arc::new(
///     Fact::new(FactId::new("Person~B"), "Person").with_field("age", 21.0),
/// );
/// let chain = BindingChain::single("p", person);
/// let patterns = PatternCache::default();
///
/// let adult = Expr::binary(BinaryOp::Ge, Expr::field("p", "age"), Expr::Number(18.0));
/// assert!(Evaluator::new(&chain, &patterns).condition(&adult).unwrap());
/// ```
pub struct Evaluator<'a> {
    bindings: &'a BindingChain,
    patterns: &'a PatternCache,
    mode: EvalMode,
    locals: Option<&'a Locals>,
    facts: Option<&'a dyn FactSource>,
}

impl<'a> Evaluator<'a> {
    /// Creates a strict evaluator over `bindings`.
    #[must_use]
    pub const fn new(bindings: &'a BindingChain, patterns: &'a PatternCache) -> Self {
        Self {
            bindings,
            patterns,
            mode: EvalMode::Strict,
            locals: None,
            facts: None,
        }
    }

    /// Sets the evaluation mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    /// Supplies named intermediate values, consulted before the binding chain.
    #[must_use]
    pub const fn with_locals(mut self, locals: &'a Locals) -> Self {
        self.locals = Some(locals);
        self
    }

    /// Supplies the fact source used by `EXISTS`.
    #[must_use]
    pub fn with_facts(mut self, facts: &'a dyn FactSource) -> Self {
        self.facts = Some(facts);
        self
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Evaluates an expression in value context.
    ///
    /// In partial mode an unknown result is returned as [`Value::Nil`].
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error encountered.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value> {
        Ok(self.eval(expr)?.unwrap_or(Value::Nil))
    }

    /// Evaluates an expression in condition context.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails, if the result is not a bool, or if
    /// the result is unknown.
    pub fn condition(&self, expr: &Expr) -> Result<bool> {
        self.partial_condition(expr)?.ok_or_else(|| {
            Error::internal(format!("condition {expr} is unknown in strict evaluation"))
        })
    }

    /// Evaluates a condition, returning `None` when it depends on unbound
    /// variables (partial mode only).
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails or the result is not a bool.
    pub fn partial_condition(&self, expr: &Expr) -> Result<Option<bool>> {
        match self.eval(expr)? {
            None => Ok(None),
            Some(value) => truthy(&value).map(Some),
        }
    }

    /// Core evaluation. `Ok(None)` is the unknown value.
    fn eval(&self, expr: &Expr) -> Result<Option<Value>> {
        match expr {
            Expr::Number(n) => Ok(Some(Value::Number(*n))),
            Expr::String(s) => Ok(Some(Value::String(Arc::clone(s)))),
            Expr::Bool(b) => Ok(Some(Value::Bool(*b))),
            Expr::Variable(name) => self.variable(name),
            Expr::FieldAccess { object, field } => self.field_access(object, field),
            Expr::Binary { op, left, right } => {
                let (Some(l), Some(r)) = (self.eval(left)?, self.eval(right)?) else {
                    return Ok(None);
                };
                apply_binary(*op, &l, &r, self.patterns).map(Some)
            }
            Expr::Logical { left, operations } => self.logical(left, operations),
            Expr::Not(inner) => self
                .eval(inner)?
                .map(|v| truthy(&v).map(|b| Value::Bool(!b)))
                .transpose(),
            Expr::Exists {
                variable,
                type_name,
                condition,
            } => self.exists(variable, type_name, condition),
            Expr::Cast { target, inner } => {
                self.eval(inner)?.map(|v| cast(&v, *target)).transpose()
            }
            Expr::FunctionCall { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let Some(v) = self.eval(arg)? else {
                        return Ok(None);
                    };
                    values.push(v);
                }
                functions::call(*function, &values).map(Some)
            }
            Expr::Array(items) => {
                let mut values = trellis_foundation::im::Vector::new();
                for item in items {
                    let Some(v) = self.eval(item)? else {
                        return Ok(None);
                    };
                    values.push_back(v);
                }
                Ok(Some(Value::Array(values)))
            }
            Expr::FactCreation { .. }
            | Expr::InlineFact { .. }
            | Expr::FactModification { .. }
            | Expr::UpdateWithModifications { .. } => Err(Error::malformed(format!(
                "{expr} is only valid as an action argument"
            ))),
        }
    }

    fn unbound(&self, name: &str) -> Result<Option<Value>> {
        match self.mode {
            EvalMode::PartialForJoinPlanning => Ok(None),
            EvalMode::Strict => {
                let mut available: Vec<String> = self
                    .bindings
                    .variables()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                if let Some(locals) = self.locals {
                    available.extend(locals.keys().map(ToString::to_string));
                }
                Err(Error::unbound_variable(name, available))
            }
        }
    }

    fn variable(&self, name: &str) -> Result<Option<Value>> {
        if let Some(value) = self.locals.and_then(|l| l.get(name)) {
            return Ok(Some(value.clone()));
        }
        match self.bindings.get(name) {
            Some(fact) => Ok(Some(Value::Fact(Arc::clone(fact)))),
            None => self.unbound(name),
        }
    }

    fn field_access(&self, object: &str, field: &str) -> Result<Option<Value>> {
        let Some(fact) = self.bindings.get(object) else {
            return self.unbound(object);
        };
        fact.get(field)
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::missing_field(format!("{object} ({})", fact.id()), field))
    }

    fn logical(&self, left: &Expr, operations: &[(LogicalOp, Expr)]) -> Result<Option<Value>> {
        let mut acc = self.eval(left)?.map(|v| truthy(&v)).transpose()?;
        for (op, right) in operations {
            // Short-circuit on a decided value, exactly like && and ||.
            match (op, acc) {
                (LogicalOp::And, Some(false)) | (LogicalOp::Or, Some(true)) => continue,
                _ => {}
            }
            let rhs = self.eval(right)?.map(|v| truthy(&v)).transpose()?;
            acc = match (op, acc, rhs) {
                (LogicalOp::And, _, Some(false)) => Some(false),
                (LogicalOp::And, Some(true), Some(true)) => Some(true),
                (LogicalOp::Or, _, Some(true)) => Some(true),
                (LogicalOp::Or, Some(false), Some(false)) => Some(false),
                _ => None,
            };
        }
        Ok(acc.map(Value::Bool))
    }

    fn exists(&self, variable: &str, type_name: &str, condition: &Expr) -> Result<Option<Value>> {
        let Some(source) = self.facts else {
            return Err(Error::internal("EXISTS evaluated without a fact source"));
        };
        let mut unknown = false;
        for candidate in source.facts_of_type(type_name) {
            let chain = self.bindings.add(variable, candidate);
            let nested = Evaluator {
                bindings: &chain,
                patterns: self.patterns,
                mode: self.mode,
                locals: self.locals,
                facts: self.facts,
            };
            match nested.partial_condition(condition)? {
                Some(true) => return Ok(Some(Value::Bool(true))),
                Some(false) => {}
                None => unknown = true,
            }
        }
        Ok(if unknown { None } else { Some(Value::Bool(false)) })
    }
}

/// Interprets a condition result.
fn truthy(value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::type_mismatch("bool", value.kind_name()))
}

/// Equality used by `==`, `!=`, `IN`, and join keys.
///
/// Facts, fact references, and strings compare by identity when either side is
/// a fact or fact reference. Numbers compare numerically; everything else
/// structurally.
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left.is_fact_like() || right.is_fact_like() {
        return match (left.identity(), right.identity()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        };
    }
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => left == right,
    }
}

/// Evaluates a comparison operator.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidOperands`] when the operator does not apply to
/// the operand kinds, or a pattern error for `LIKE`/`MATCHES`.
pub fn compare_values(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    patterns: &PatternCache,
) -> Result<bool> {
    let invalid = || Error::invalid_operands(op.symbol(), left.kind_name(), right.kind_name());
    match op {
        BinaryOp::Eq => Ok(values_equal(left, right)),
        BinaryOp::Ne => Ok(!values_equal(left, right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (Value::Number(a), Value::Number(b)) = (left, right) else {
                return Err(invalid());
            };
            Ok(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            })
        }
        BinaryOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(&**needle)),
            (Value::Array(items), needle) => Ok(items.iter().any(|i| values_equal(i, needle))),
            _ => Err(invalid()),
        },
        BinaryOp::In => match right {
            Value::Array(items) => Ok(items.iter().any(|i| values_equal(left, i))),
            _ => Err(invalid()),
        },
        BinaryOp::Like | BinaryOp::Matches => {
            let (Value::String(text), Value::String(pattern)) = (left, right) else {
                return Err(invalid());
            };
            let dialect = if op == BinaryOp::Like {
                Dialect::Like
            } else {
                Dialect::Regex
            };
            patterns.is_match(dialect, pattern, text)
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            Err(Error::new(ErrorKind::UnsupportedOperator(format!(
                "{op} is not a comparison"
            ))))
        }
    }
}

/// Evaluates an arithmetic operator.
///
/// `+` adds numbers or concatenates strings; mixing the two requires an
/// explicit cast. `%` truncates both operands to integers.
///
/// # Errors
///
/// Returns [`ErrorKind::TypeMismatch`] for non-numeric operands,
/// [`ErrorKind::DivisionByZero`] and [`ErrorKind::ModuloByZero`].
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                return Ok(Value::from(s));
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                return Err(Error::type_mismatch(
                    "two strings or two numbers; use an explicit cast",
                    format!("{} + {}", left.kind_name(), right.kind_name()),
                ));
            }
            _ => {}
        }
    }
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(Error::type_mismatch(
            "number",
            format!("{} {op} {}", left.kind_name(), right.kind_name()),
        ));
    };
    let (a, b) = (*a, *b);
    Ok(Value::Number(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(Error::new(ErrorKind::DivisionByZero));
            }
            a / b
        }
        BinaryOp::Mod => {
            #[allow(clippy::cast_possible_truncation)]
            let (x, y) = (a as i64, b as i64);
            if y == 0 {
                return Err(Error::new(ErrorKind::ModuloByZero));
            }
            #[allow(clippy::cast_precision_loss)]
            let rem = x.wrapping_rem(y) as f64;
            rem
        }
        _ => {
            return Err(Error::new(ErrorKind::UnsupportedOperator(format!(
                "{op} is not arithmetic"
            ))));
        }
    }))
}

/// Applies any binary operator to evaluated operands.
///
/// # Errors
///
/// See [`arithmetic`] and [`compare_values`].
pub fn apply_binary(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    patterns: &PatternCache,
) -> Result<Value> {
    if op.is_arithmetic() {
        arithmetic(op, left, right)
    } else {
        compare_values(op, left, right, patterns).map(Value::Bool)
    }
}
