//! Integration tests for Layer 1: Storage
//!
//! Tests for the storage trait, the in-memory backend, and the fact index.

mod index;
mod memory;
