//! Integration tests for Layer 3: Engine
//!
//! Tests for rule wiring, joins, exists nodes, transactions, actions, and metrics.

mod actions;
mod exists;
mod rules;
mod transactions;
