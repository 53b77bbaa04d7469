//! Alpha nodes: single-variable tests.
//!
//! Three flavours share one node type:
//! - a plain filter forwards a token when its condition holds
//! - an atomic step computes one arithmetic intermediate and attaches it to the
//!   token's locals, consulting the shared result cache first
//! - a comparison closes a decomposed chain, reading the temps from the locals

use std::fmt;
use std::sync::Arc;

use tracing::warn;
use trellis_foundation::{Fact, Result};
use trellis_language::{Evaluator, Expr, FactSource, PatternCache, arithmetic};
use trellis_storage::Storage;

use crate::cache::{ArithmeticResultCache, ResultKey};
use crate::decompose::AtomicStep;
use crate::node::NodeId;
use crate::token::{Token, TokenIds};

/// The test an alpha node applies.
#[derive(Clone, Debug, PartialEq)]
pub enum AlphaTest {
    /// Forward when the condition is true.
    Filter(Expr),
    /// Compute `result = left op right` and forward with the result attached.
    Step(AtomicStep),
    /// Forward when the final comparison of a decomposed chain is true.
    Comparison(Expr),
}

impl AlphaTest {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Filter(_) => "alpha",
            Self::Step(_) => "atomic",
            Self::Comparison(_) => "comparison",
        }
    }
}

impl fmt::Display for AlphaTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(expr) => write!(f, "{expr}"),
            Self::Step(step) => write!(f, "{step}"),
            Self::Comparison(expr) => write!(f, "cmp {expr}"),
        }
    }
}

/// A single-variable test node.
#[derive(Clone, Debug, PartialEq)]
pub struct AlphaNode {
    /// Variable the test reads.
    pub variable: Arc<str>,
    /// The test.
    pub test: AlphaTest,
}

/// Shared services an alpha activation needs.
pub struct AlphaContext<'a> {
    /// Compiled LIKE/MATCHES patterns.
    pub patterns: &'a PatternCache,
    /// Candidate facts for `EXISTS`.
    pub facts: &'a dyn FactSource,
    /// Atomic step results.
    pub cache: &'a ArithmeticResultCache,
    /// Token serial numbers.
    pub ids: &'a TokenIds,
}

/// What an alpha activation produced.
#[derive(Debug)]
pub struct AlphaOutcome {
    /// Token to forward, if the test passed.
    pub token: Option<Token>,
    /// For atomic steps, whether the result came from the cache.
    pub cache_hit: Option<bool>,
}

impl AlphaNode {
    /// Creates a node.
    #[must_use]
    pub fn new(variable: &str, test: AlphaTest) -> Self {
        Self {
            variable: Arc::from(variable),
            test,
        }
    }

    /// Applies the test to an incoming token.
    ///
    /// # Errors
    ///
    /// Returns the evaluation error; the caller drops the token.
    pub fn activate(
        &self,
        node: NodeId,
        token: &Arc<Token>,
        ctx: &AlphaContext<'_>,
    ) -> Result<AlphaOutcome> {
        let eval = Evaluator::new(&token.bindings, ctx.patterns)
            .with_locals(&token.locals)
            .with_facts(ctx.facts);
        match &self.test {
            AlphaTest::Filter(expr) | AlphaTest::Comparison(expr) => {
                let passed = eval.condition(expr)?;
                Ok(AlphaOutcome {
                    token: passed.then(|| token.forwarded(ctx.ids.allocate(), node)),
                    cache_hit: None,
                })
            }
            AlphaTest::Step(step) => {
                let left = eval.evaluate(&step.left.to_expr())?;
                let right = eval.evaluate(&step.right.to_expr())?;
                let key = ResultKey::new(step.signature(), vec![left.clone(), right.clone()]);
                let (value, hit) = ctx
                    .cache
                    .get_or_compute(key, || arithmetic(step.op, &left, &right))?;
                Ok(AlphaOutcome {
                    token: Some(token.with_local(ctx.ids.allocate(), node, &step.result, value)),
                    cache_hit: Some(hit),
                })
            }
        }
    }
}

/// [`FactSource`] over a storage backend, for `EXISTS`.
pub struct StoredFacts<'a>(pub &'a dyn Storage);

impl FactSource for StoredFacts<'_> {
    fn facts_of_type(&self, type_name: &str) -> Vec<Arc<Fact>> {
        self.0.facts_of_type(type_name).unwrap_or_else(|err| {
            warn!(type_name, error = %err, "EXISTS could not read the store");
            Vec::new()
        })
    }
}
