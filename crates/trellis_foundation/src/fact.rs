//! Facts and fact identities.
//!
//! A [`Fact`] is an immutable typed record. Its [`FactId`] is derived from the
//! primary-key fields of its type (see [`crate::identity`]), so two facts with
//! the same identity denote the same conceptual tuple.

use std::fmt;
use std::sync::Arc;

use im::OrdMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Identity of a fact: `Type~pk1_pk2` or `Type_n`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactId(Arc<str>);

impl FactId {
    /// Wraps an identity string.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the type prefix of this identity.
    ///
    /// Primary-key identities split at `~`; sequential ones at the last `_`.
    #[must_use]
    pub fn type_prefix(&self) -> &str {
        if let Some((ty, _)) = self.0.split_once('~') {
            return ty;
        }
        match self.0.rsplit_once('_') {
            Some((ty, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => ty,
            _ => &self.0,
        }
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", self.0)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FactId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl AsRef<str> for FactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An immutable typed record.
///
/// Modification produces a new `Fact`; the field map is a persistent
/// [`OrdMap`], so copies share structure with the original.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fact {
    id: FactId,
    type_name: Arc<str>,
    fields: OrdMap<Arc<str>, Value>,
}

impl Fact {
    /// Creates a fact with no fields.
    #[must_use]
    pub fn new(id: FactId, type_name: &str) -> Self {
        Self {
            id,
            type_name: Arc::from(type_name),
            fields: OrdMap::new(),
        }
    }

    /// Creates a fact from an already-built field map.
    #[must_use]
    pub fn from_fields(id: FactId, type_name: &str, fields: OrdMap<Arc<str>, Value>) -> Self {
        Self {
            id,
            type_name: Arc::from(type_name),
            fields,
        }
    }

    /// Adds a field (builder style).
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(Arc::from(name), value.into());
        self
    }

    /// Returns a copy with one field overwritten. The identity is unchanged.
    #[must_use]
    pub fn set(&self, name: &str, value: Value) -> Self {
        Self {
            id: self.id.clone(),
            type_name: Arc::clone(&self.type_name),
            fields: self.fields.update(Arc::from(name), value),
        }
    }

    /// Returns a copy carrying a different identity.
    #[must_use]
    pub fn with_id(&self, id: FactId) -> Self {
        Self {
            id,
            type_name: Arc::clone(&self.type_name),
            fields: self.fields.clone(),
        }
    }

    /// Returns the identity.
    #[must_use]
    pub const fn id(&self) -> &FactId {
        &self.id
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the field map.
    #[must_use]
    pub const fn fields(&self) -> &OrdMap<Arc<str>, Value> {
        &self.fields
    }

    /// Returns true if both facts carry identical fields.
    #[must_use]
    pub fn same_fields(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fact")
            .field("id", &self.id.as_str())
            .field("type", &&*self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, ")")
    }
}
