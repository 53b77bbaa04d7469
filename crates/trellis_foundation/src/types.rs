//! Fact type definitions for schema validation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fact::FactId;
use crate::value::Value;

/// Semantic type of a fact field.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldType {
    /// String field.
    String,
    /// Numeric field.
    Number,
    /// Boolean field.
    Bool,
    /// Reference to a fact of the named type.
    Fact(Arc<str>),
}

impl FieldType {
    /// Parses a field type name as written in a program.
    ///
    /// Anything that is not a scalar keyword names a fact type.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "number" | "int" | "integer" | "float" => Self::Number,
            "bool" | "boolean" => Self::Bool,
            other => Self::Fact(Arc::from(other)),
        }
    }

    /// Returns true if a value is acceptable for this field type.
    ///
    /// Fact-typed fields accept references and bound facts of the right type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Bool, Value::Bool(_)) => true,
            (Self::Fact(ty), Value::FactRef(id)) => id.type_prefix() == &**ty,
            (Self::Fact(ty), Value::Fact(f)) => f.type_name() == &**ty,
            _ => false,
        }
    }

    /// Converts an ingested value into the representation this field stores.
    ///
    /// Fact-typed fields given a string or a bound fact store a [`Value::FactRef`].
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Fact(_), Value::String(s)) => Value::FactRef(FactId::new(&s)),
            (Self::Fact(_), Value::Fact(f)) => Value::FactRef(f.id().clone()),
            (_, v) => v,
        }
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::Fact(ty) => write!(f, "{ty}"),
        }
    }
}

/// Declaration of one field of a fact type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDefinition {
    /// Field name.
    pub name: Arc<str>,
    /// Field type.
    pub ty: FieldType,
    /// Whether this field is part of the primary key.
    pub is_primary_key: bool,
}

impl FieldDefinition {
    /// Creates a regular field.
    #[must_use]
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            is_primary_key: false,
        }
    }

    /// Creates a primary-key field.
    #[must_use]
    pub fn primary_key(name: &str, ty: FieldType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            is_primary_key: true,
        }
    }
}

/// Declared schema of a fact type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeDefinition {
    /// Type name.
    pub name: Arc<str>,
    /// Fields in declaration order.
    pub fields: Vec<FieldDefinition>,
}

impl TypeDefinition {
    /// Creates a type with no fields.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            fields: Vec::new(),
        }
    }

    /// Adds a field to the definition.
    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the field definition by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Returns the primary-key fields in declaration order.
    pub fn primary_key_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.is_primary_key)
    }

    /// Returns true if at least one field is a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.fields.iter().any(|f| f.is_primary_key)
    }

    /// Returns true if the named field is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.is_primary_key)
    }

    /// Validates a complete field map against this definition.
    ///
    /// Every declared field must be present with an accepted value and no
    /// undeclared field may appear.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::FactValidation`] describing the first problem found.
    pub fn validate<'a>(&self, fields: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Result<()> {
        let mut seen = 0usize;
        for (name, value) in fields {
            let Some(def) = self.field(name) else {
                return Err(Error::fact_validation(
                    &*self.name,
                    format!("field '{name}' is not declared"),
                ));
            };
            if !def.ty.accepts(value) {
                return Err(Error::fact_validation(
                    &*self.name,
                    format!(
                        "field '{name}' expects {}, got {}",
                        def.ty,
                        value.kind_name()
                    ),
                ));
            }
            seen += 1;
        }
        if seen != self.fields.len() {
            return Err(Error::fact_validation(
                &*self.name,
                format!(
                    "expected {} field(s), got {seen}",
                    self.fields.len()
                ),
            ));
        }
        Ok(())
    }

    /// Validates a single field value.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is undeclared or the value has the wrong type.
    pub fn validate_field(&self, name: &str, value: &Value) -> Result<()> {
        let def = self.field(name).ok_or_else(|| {
            Error::fact_validation(&*self.name, format!("field '{name}' is not declared"))
        })?;
        if def.ty.accepts(value) {
            Ok(())
        } else {
            Err(Error::fact_validation(
                &*self.name,
                format!("field '{name}' expects {}, got {}", def.ty, value.kind_name()),
            ))
        }
    }
}

/// Registry of declared fact types.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<Arc<str>, Arc<TypeDefinition>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a type definition.
    pub fn register(&mut self, def: TypeDefinition) -> Arc<TypeDefinition> {
        let def = Arc::new(def);
        self.types.insert(Arc::clone(&def.name), Arc::clone(&def));
        def
    }

    /// Looks up a type definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.get(name)
    }

    /// Returns the registered type names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|k| &**k)
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
