//! RETE network, joins, transactions, actions, and metrics for Trellis.
//!
//! This crate provides:
//! - [`Network`] - Node arena, rule wiring with node sharing, and the public API
//! - [`Transaction`] - Buffered fact submissions with verified, atomic commits
//! - [`ActionRegistry`] - Named action handlers run when a rule fires
//! - [`DecompositionMetrics`] - Per-rule evaluation and cache statistics
//! - [`ArithmeticResultCache`] - Memoized arithmetic over field values
//!
//! Rules are compiled from [`trellis_language::RuleDefinition`]s: single-variable
//! conditions become alpha tests (arithmetic is decomposed into atomic steps),
//! cross-variable conditions become a left-deep chain of joins, and `EXISTS`
//! conjuncts become exists nodes at the end of that chain.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod alpha;
pub mod beta;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod decompose;
pub mod dependency;
pub mod exists;
pub mod join;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod network;
pub mod node;
mod propagate;
pub mod signature_cache;
pub mod token;
pub mod transaction;

pub use action::{ActionHandler, ActionRegistry, Deferred, ExecutionContext, PrintSink, XupleHandler};
pub use cache::{ArithmeticResultCache, ResultCacheStats};
pub use compiler::{CompiledRule, ExistsCondition, compile_rule};
pub use config::{
    ArithmeticCacheConfig, CacheSettings, ChainPerformanceConfig, EngineConfig, EvictionPolicy,
    MetricsConfig,
};
pub use decompose::{AtomicStep, DecomposedChain, decompose};
pub use lifecycle::LifecycleStats;
pub use metrics::{DecompositionMetrics, MetricsSummary, RuleMetrics};
pub use network::{Network, NetworkSummary, RetractionHandler};
pub use node::{Node, NodeId};
pub use propagate::{ActivationRecord, Compensation};
pub use token::Token;
pub use transaction::{CommitReport, Transaction, TransactionOptions};
