//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, Fact, identities, type definitions, and Error.

mod facts;
