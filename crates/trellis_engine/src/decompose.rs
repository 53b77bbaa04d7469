//! Arithmetic decomposition of alpha conditions.
//!
//! A comparison whose operands hold more than one arithmetic operation is
//! split into atomic steps, each computing one `temp_k = operand op operand`,
//! followed by a comparison over the final temps. Each step becomes its own
//! alpha node, so identical sub-computations are shared between rules and
//! their results can be cached.
//!
//! ```
//! use trellis_engine::decompose::decompose;
//! use trellis_language::{BinaryOp, Expr};
//!
//! // p.price * p.qty + 10 > 100
//! let cond = Expr::binary(
//!     BinaryOp::Gt,
//!     Expr::binary(
//!         BinaryOp::Add,
//!         Expr::binary(BinaryOp::Mul, Expr::field("p", "price"), Expr::field("p", "qty")),
//!         Expr::Number(10.0),
//!     ),
//!     Expr::Number(100.0),
//! );
//! let mut counter = 0;
//! let chain = decompose("p", &cond, &mut counter).unwrap();
//! assert_eq!(chain.chain_length(), 3);
//! assert_eq!(chain.comparison.to_string(), "(temp_2 > 100)");
//! ```

use std::fmt;
use std::sync::Arc;

use trellis_foundation::Result;
use trellis_language::{BinaryOp, Expr};

use crate::dependency::{CircularDependencyDetector, ValidationReport};

/// Prefix of generated intermediate names.
pub const TEMP_PREFIX: &str = "temp_";

/// One input of an atomic step.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A field of the rule variable.
    Field {
        /// Variable name.
        variable: Arc<str>,
        /// Field name.
        field: Arc<str>,
    },
    /// A literal expression.
    Literal(Expr),
    /// The result of an earlier step.
    Temp(Arc<str>),
    /// Anything else (function calls, casts), evaluated as a whole.
    Expr(Expr),
}

impl Operand {
    /// Returns the expression that evaluates this operand.
    ///
    /// Temps become variable references, which the evaluator resolves from the
    /// token's locals.
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        match self {
            Self::Field { variable, field } => Expr::FieldAccess {
                object: Arc::clone(variable),
                field: Arc::clone(field),
            },
            Self::Literal(e) | Self::Expr(e) => e.clone(),
            Self::Temp(name) => Expr::Variable(Arc::clone(name)),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { variable, field } => write!(f, "{variable}.{field}"),
            Self::Temp(name) => write!(f, "{name}"),
            Self::Literal(e) | Self::Expr(e) => write!(f, "{e}"),
        }
    }
}

/// `result = left op right`.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomicStep {
    /// Name of the intermediate this step produces.
    pub result: Arc<str>,
    /// Arithmetic operator.
    pub op: BinaryOp,
    /// Left input.
    pub left: Operand,
    /// Right input.
    pub right: Operand,
    /// Temps this step consumes.
    pub dependencies: Vec<Arc<str>>,
}

impl AtomicStep {
    /// Creates a step, deriving its dependencies from temp operands.
    #[must_use]
    pub fn new(result: &str, op: BinaryOp, left: Operand, right: Operand) -> Self {
        let dependencies = [&left, &right]
            .into_iter()
            .filter_map(|o| match o {
                Operand::Temp(name) => Some(Arc::clone(name)),
                _ => None,
            })
            .collect();
        Self {
            result: Arc::from(result),
            op,
            left,
            right,
            dependencies,
        }
    }

    /// Structural signature, used for node sharing and cache keys.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{} = {} {} {}", self.result, self.left, self.op, self.right)
    }
}

impl fmt::Display for AtomicStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// A decomposed comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposedChain {
    /// Rule variable the condition reads.
    pub variable: Arc<str>,
    /// Atomic steps, in declaration order.
    pub steps: Vec<AtomicStep>,
    /// Final comparison over temps, fields, and literals.
    pub comparison: Expr,
}

impl DecomposedChain {
    /// Steps plus the comparison.
    #[must_use]
    pub fn chain_length(&self) -> usize {
        self.steps.len() + 1
    }

    /// Number of atomic steps.
    #[must_use]
    pub fn atomic_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of comparison steps (always one).
    #[must_use]
    pub const fn comparison_steps(&self) -> usize {
        1
    }

    /// Builds the step dependency graph.
    #[must_use]
    pub fn dependency_graph(&self) -> CircularDependencyDetector {
        let mut graph = CircularDependencyDetector::new();
        for step in &self.steps {
            let deps: Vec<&str> = step.dependencies.iter().map(|d| &**d).collect();
            graph.add_node(&step.result, &deps);
        }
        graph
    }

    /// Validates the step graph.
    ///
    /// # Errors
    ///
    /// Returns [`trellis_foundation::ErrorKind::CircularDependency`] naming the
    /// cycle, or `InvalidDependencies` if a step consumes an undeclared temp.
    pub fn validate(&self) -> Result<ValidationReport> {
        self.dependency_graph().validate().into_result()
    }

    /// Returns the steps in an order where every step follows its inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the steps contain a cycle.
    pub fn execution_order(&self) -> Result<Vec<&AtomicStep>> {
        let order = self.dependency_graph().topological_sort()?;
        Ok(order
            .iter()
            .filter_map(|name| self.steps.iter().find(|s| &*s.result == name))
            .collect())
    }

    /// Longest chain of dependent steps.
    #[must_use]
    pub fn max_dependency_depth(&self) -> usize {
        self.dependency_graph().validate().max_depth
    }
}

/// Decomposes `condition` if it is a comparison over more than one arithmetic
/// operation. `counter` numbers the temps and is shared across a rule.
#[must_use]
pub fn decompose(variable: &str, condition: &Expr, counter: &mut usize) -> Option<DecomposedChain> {
    let Expr::Binary { op, left, right } = condition else {
        return None;
    };
    if !op.is_comparison() || condition.arithmetic_op_count() <= 1 {
        return None;
    }
    let mut steps = Vec::new();
    let left = reduce(left, &mut steps, counter);
    let right = reduce(right, &mut steps, counter);
    Some(DecomposedChain {
        variable: Arc::from(variable),
        steps,
        comparison: Expr::binary(*op, left.to_expr(), right.to_expr()),
    })
}

fn reduce(expr: &Expr, steps: &mut Vec<AtomicStep>, counter: &mut usize) -> Operand {
    match expr {
        Expr::FieldAccess { object, field } => Operand::Field {
            variable: Arc::clone(object),
            field: Arc::clone(field),
        },
        e if e.is_literal() => Operand::Literal(e.clone()),
        Expr::Binary { op, left, right } if op.is_arithmetic() => {
            let left = reduce(left, steps, counter);
            let right = reduce(right, steps, counter);
            *counter += 1;
            let name = format!("{TEMP_PREFIX}{counter}");
            steps.push(AtomicStep::new(&name, *op, left, right));
            Operand::Temp(Arc::from(name))
        }
        other => Operand::Expr(other.clone()),
    }
}
