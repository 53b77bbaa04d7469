//! Primary-key-based fact identities.
//!
//! Identities take the form `Type~pk1_pk2` for types declaring primary keys and
//! `Type_n` otherwise. Key values are escaped so that an identity can always be
//! split back into its parts with [`parse_fact_id`].

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fact::FactId;
use crate::types::TypeDefinition;
use crate::value::{Value, format_number};

/// Separates the type name from the key values.
pub const TYPE_SEPARATOR: char = '~';
/// Separates composite key values.
pub const KEY_SEPARATOR: char = '_';

/// Escapes a key value so it cannot be confused with a separator.
#[must_use]
pub fn escape_key_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '~' => out.push_str("%7E"),
            '_' => out.push_str("%5F"),
            ' ' => out.push_str("%20"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape_key_value`].
#[must_use]
pub fn unescape_key_value(escaped: &str) -> String {
    escaped
        .replace("%20", " ")
        .replace("%5F", "_")
        .replace("%7E", "~")
        .replace("%25", "%")
}

/// Renders a key value in identity form.
///
/// Strings are verbatim, integral numbers drop `.0`, booleans are `true`/`false`,
/// fact references render as their identity.
#[must_use]
pub fn key_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Bool(b) => b.to_string(),
        Value::FactRef(id) => id.to_string(),
        Value::Fact(f) => f.id().to_string(),
        other => other.to_string(),
    }
}

/// Computes the primary-key identity for a field map.
///
/// Returns `Ok(None)` when the type declares no primary key.
///
/// # Errors
///
/// Returns an error if a primary-key field has no value.
pub fn primary_key_identity<'a, F>(def: &TypeDefinition, lookup: F) -> Result<Option<FactId>>
where
    F: Fn(&str) -> Option<&'a Value>,
{
    if !def.has_primary_key() {
        return Ok(None);
    }
    let mut parts = Vec::new();
    for field in def.primary_key_fields() {
        let value = lookup(&field.name).ok_or_else(|| {
            Error::fact_validation(
                &*def.name,
                format!("primary key field '{}' is missing", field.name),
            )
        })?;
        parts.push(escape_key_value(&key_value_string(value)));
    }
    let sep = KEY_SEPARATOR.to_string();
    Ok(Some(FactId::from(format!(
        "{}{TYPE_SEPARATOR}{}",
        def.name,
        parts.join(&sep)
    ))))
}

/// Splits an identity into its type and key values.
///
/// Returns `None` for sequential (`Type_n`) identities.
#[must_use]
pub fn parse_fact_id(id: &FactId) -> Option<(String, Vec<String>)> {
    let (ty, keys) = id.as_str().split_once(TYPE_SEPARATOR)?;
    let values = keys.split(KEY_SEPARATOR).map(unescape_key_value).collect();
    Some((ty.to_string(), values))
}

/// Allocates identities for facts, falling back to a sequential counter for
/// types without a primary key.
///
/// One generator is owned by each network; the counter is guarded by its own mutex.
#[derive(Debug, Default)]
pub struct FactIdGenerator {
    counter: Mutex<u64>,
}

impl FactIdGenerator {
    /// Creates a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequential identity for `type_name`.
    pub fn next_sequential(&self, type_name: &str) -> FactId {
        let mut counter = self.counter.lock();
        *counter += 1;
        FactId::from(format!("{type_name}{KEY_SEPARATOR}{}", *counter))
    }

    /// Generates the identity for a fact of `def` with the given fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a primary-key field is missing.
    pub fn generate<'a, F>(&self, def: &TypeDefinition, lookup: F) -> Result<FactId>
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        match primary_key_identity(def, lookup)? {
            Some(id) => Ok(id),
            None => Ok(self.next_sequential(&def.name)),
        }
    }

    /// Returns how many sequential identities have been allocated.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        *self.counter.lock()
    }
}
