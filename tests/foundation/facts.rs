//! Integration tests for facts, identities, and type definitions

use std::collections::HashMap;
use std::sync::Arc;

use trellis_foundation::{
    BindingChain, ErrorKind, Fact, FactId, FactIdGenerator, FieldDefinition, FieldType,
    TypeDefinition, TypeRegistry, Value, escape_key_value, parse_fact_id, primary_key_identity,
};

fn person_type() -> TypeDefinition {
    TypeDefinition::new("Person")
        .with_field(FieldDefinition::primary_key("name", FieldType::String))
        .with_field(FieldDefinition::new("age", FieldType::Number))
}

fn login_type() -> TypeDefinition {
    TypeDefinition::new("Login")
        .with_field(FieldDefinition::new("user", FieldType::parse("User")))
        .with_field(FieldDefinition::new("email", FieldType::String))
}

// =============================================================================
// Identities
// =============================================================================

#[test]
fn primary_key_identity_uses_key_values() {
    let fields: HashMap<&str, Value> = [("name", Value::from("Alice")), ("age", Value::Number(30.0))].into();
    let id = primary_key_identity(&person_type(), |n| fields.get(n)).unwrap();
    assert_eq!(id, Some(FactId::new("Person~Alice")));
}

#[test]
fn composite_keys_join_with_underscore_and_escape() {
    let def = TypeDefinition::new("Cell")
        .with_field(FieldDefinition::primary_key("row", FieldType::Number))
        .with_field(FieldDefinition::primary_key("col", FieldType::String));
    let fields: HashMap<&str, Value> = [("row", Value::Number(3.0)), ("col", Value::from("a_b"))].into();
    let id = primary_key_identity(&def, |n| fields.get(n)).unwrap().unwrap();
    assert_eq!(id.as_str(), "Cell~3_a%5Fb");

    let (ty, keys) = parse_fact_id(&id).unwrap();
    assert_eq!(ty, "Cell");
    assert_eq!(keys, vec!["3".to_string(), "a_b".to_string()]);
}

#[test]
fn escaping_covers_separators() {
    assert_eq!(escape_key_value("a~b c%"), "a%7Eb%20c%25");
}

#[test]
fn missing_key_field_is_rejected() {
    let fields: HashMap<&str, Value> = [("age", Value::Number(30.0))].into();
    let err = primary_key_identity(&person_type(), |n| fields.get(n)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FactValidation { .. }));
}

#[test]
fn keyless_types_get_sequential_identities() {
    let ids = FactIdGenerator::new();
    let def = login_type();
    let empty: HashMap<&str, Value> = HashMap::new();
    assert_eq!(ids.generate(&def, |n| empty.get(n)).unwrap().as_str(), "Login_1");
    assert_eq!(ids.generate(&def, |n| empty.get(n)).unwrap().as_str(), "Login_2");
    assert_eq!(ids.allocated(), 2);
    assert!(parse_fact_id(&FactId::new("Login_2")).is_none());
}

// =============================================================================
// Type definitions
// =============================================================================

#[test]
fn validate_requires_every_declared_field() {
    let def = person_type();
    let name = Value::from("B");
    let age = Value::Number(20.0);
    assert!(def.validate([("name", &name), ("age", &age)]).is_ok());
    assert!(def.validate([("name", &name)]).is_err());
    assert!(def.validate([("name", &name), ("age", &name)]).is_err());
    assert!(def.validate([("name", &name), ("age", &age), ("x", &age)]).is_err());
}

#[test]
fn fact_typed_fields_accept_references() {
    let def = login_type();
    let user = FieldType::Fact(Arc::from("User"));
    let coerced = user.coerce(Value::from("User~u1"));
    assert_eq!(coerced, Value::FactRef(FactId::new("User~u1")));
    assert!(def.validate_field("user", &coerced).is_ok());
    assert!(def.validate_field("user", &Value::FactRef(FactId::new("Other~u1"))).is_err());
}

#[test]
fn registry_replaces_redeclared_types() {
    let mut registry = TypeRegistry::new();
    registry.register(person_type());
    registry.register(person_type().with_field(FieldDefinition::new("email", FieldType::String)));
    assert_eq!(registry.len(), 1);
    assert!(registry.get("Person").unwrap().field("email").is_some());
    assert!(registry.get("Ghost").is_none());
}

// =============================================================================
// Facts and bindings
// =============================================================================

#[test]
fn set_returns_a_copy_with_the_same_identity() {
    let task = Fact::new(FactId::new("Task~T1"), "Task").with_field("status", "open");
    let done = task.set("status", Value::from("done"));
    assert_eq!(done.id(), task.id());
    assert_eq!(task.get("status"), Some(&Value::from("open")));
    assert_eq!(done.get("status"), Some(&Value::from("done")));
}

#[test]
fn binding_chains_are_persistent() {
    let a = Arc::new(Fact::new(FactId::new("User~u1"), "User"));
    let b = Arc::new(Fact::new(FactId::new("Login_1"), "Login"));
    let one = BindingChain::single("u", Arc::clone(&a));
    let two = one.add("l", Arc::clone(&b));
    assert!(one.get("l").is_none());
    assert_eq!(two.get("l").map(|f| f.id().as_str()), Some("Login_1"));
    assert_eq!(two.len(), 2);

    let other = BindingChain::single("l", b);
    assert!(two.shares_variable_with(&other));
    assert!(!one.shares_variable_with(&other));
    assert_eq!(one.merge(&other).len(), 2);
}
