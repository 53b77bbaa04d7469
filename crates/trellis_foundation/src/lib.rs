//! Core types, values, and persistent bindings for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The typed value carried by fact fields and expressions
//! - [`Fact`] / [`FactId`] - Immutable typed records and their identities
//! - [`TypeDefinition`] - Fact schemas with primary-key fields
//! - [`FactIdGenerator`] - Primary-key and sequential identity allocation
//! - [`BindingChain`] - Persistent variable-to-fact bindings
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod binding;
pub mod error;
pub mod fact;
pub mod identity;
pub mod types;
pub mod value;

pub use binding::BindingChain;
pub use error::{Error, ErrorContext, ErrorKind, Result, SemanticLimit};
pub use fact::{Fact, FactId};
pub use identity::{FactIdGenerator, escape_key_value, parse_fact_id, primary_key_identity};
pub use types::{FieldDefinition, FieldType, TypeDefinition, TypeRegistry};
pub use value::{Value, format_number};

/// Re-exported so downstream crates share one persistent-collection version.
pub use im;
