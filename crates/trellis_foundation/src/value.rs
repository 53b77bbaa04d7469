//! Core value type for fact fields and expression results.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use im::Vector;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fact::{Fact, FactId};

/// A typed value carried by fact fields and produced by expressions.
///
/// Values are immutable and cheaply cloneable. All numbers are 64-bit
/// floats; integer inputs are promoted on ingest.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// The nil value (absence, or "unknown" during partial evaluation).
    Nil,
    /// Boolean value.
    Bool(bool),
    /// Number (always stored as f64).
    Number(f64),
    /// String value.
    String(Arc<str>),
    /// Reference to a fact by identity (fact-valued fields).
    FactRef(FactId),
    /// A fact bound to a variable.
    Fact(Arc<Fact>),
    /// Array literal value, used by `IN`.
    Array(Vector<Value>),
}

impl Value {
    /// Returns the name of this value's kind, as used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::FactRef(_) | Self::Fact(_) => "fact",
            Self::Array(_) => "array",
        }
    }

    /// Returns true if this is nil.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns the boolean if this is a bool.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number if this is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string slice if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the fact if this is a bound fact.
    #[must_use]
    pub const fn as_fact(&self) -> Option<&Arc<Fact>> {
        match self {
            Self::Fact(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the elements if this is an array.
    #[must_use]
    pub const fn as_array(&self) -> Option<&Vector<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the identity this value denotes when compared against a fact.
    ///
    /// Facts and fact references yield their identity. Strings are treated as
    /// identities too, so a field holding `"User~alice"` matches the fact
    /// `User~alice`.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::FactRef(id) => Some(id.as_str()),
            Self::Fact(f) => Some(f.id().as_str()),
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if this value is a fact or a fact reference.
    #[must_use]
    pub const fn is_fact_like(&self) -> bool {
        matches!(self, Self::FactRef(_) | Self::Fact(_))
    }
}

/// Formats a number the way identities and casts expect.
///
/// Integral values drop the fractional part (`42`, not `42.0`).
#[must_use]
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // Avoid printing negative zero.
        return "0".to_string();
    }
    format!("{n}")
}

// Implement PartialEq manually to handle float comparison
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::FactRef(a), Self::FactRef(b)) => a == b,
            (Self::Fact(a), Self::Fact(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::FactRef(id) => id.hash(state),
            // Equal facts share an identity, so hashing the id is consistent with Eq.
            Self::Fact(f) => f.id().hash(state),
            Self::Array(items) => items.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Nil, Self::Nil) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::FactRef(a), Self::FactRef(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::FactRef(id) => write!(f, "&{id}"),
            Self::Fact(fact) => write!(f, "{fact:?}"),
            Self::Array(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::String(s) => write!(f, "{s}"),
            Self::FactRef(id) => write!(f, "{id}"),
            Self::Fact(fact) => write!(f, "{fact}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::String(s)
    }
}

impl From<FactId> for Value {
    fn from(id: FactId) -> Self {
        Self::FactRef(id)
    }
}

impl From<Arc<Fact>> for Value {
    fn from(fact: Arc<Fact>) -> Self {
        Self::Fact(fact)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
