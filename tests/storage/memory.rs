//! Integration tests for MemoryStorage

use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, FactId, Value};
use trellis_storage::{MemoryStorage, Storage, StorageError};

fn person(name: &str, age: f64) -> Fact {
    Fact::new(FactId::new(&format!("Person~{name}")), "Person")
        .with_field("name", name)
        .with_field("age", age)
}

// =============================================================================
// Storage trait
// =============================================================================

#[test]
fn put_returns_previous_version() {
    let store = MemoryStorage::new();
    assert!(store.put(Arc::new(person("A", 17.0))).unwrap().is_none());
    let previous = store.put(Arc::new(person("A", 18.0))).unwrap().unwrap();
    assert_eq!(previous.get("age"), Some(&Value::Number(17.0)));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn remove_and_get() {
    let store = MemoryStorage::with_facts([person("A", 1.0), person("B", 2.0)]);
    let id = FactId::new("Person~A");
    assert!(store.get(&id).unwrap().is_some());
    assert!(store.remove(&id).unwrap().is_some());
    assert!(store.get(&id).unwrap().is_none());
    assert!(store.remove(&id).unwrap().is_none());
    assert_eq!(store.facts_of_type("Person").unwrap().len(), 1);
}

#[test]
fn clear_empties_the_store() {
    let store = MemoryStorage::with_facts([person("A", 1.0)]);
    store.clear().unwrap();
    assert!(store.is_empty().unwrap());
    assert!(store.facts_of_type("Person").unwrap().is_empty());
}

#[test]
fn shared_handles_see_the_same_facts() {
    let store = Arc::new(MemoryStorage::new());
    let handle: Arc<dyn Storage> = Arc::clone(&store) as Arc<dyn Storage>;
    handle.put(Arc::new(person("A", 1.0))).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    handle.sync().unwrap();
}

#[test]
fn storage_errors_convert_to_engine_errors() {
    let err: Error = StorageError::Unavailable("offline".to_string()).into();
    assert!(matches!(err.kind, ErrorKind::Storage(_)));
    assert!(err.to_string().contains("offline"));
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn snapshot_and_restore() {
    let store = MemoryStorage::with_facts([person("A", 1.0)]);
    let snapshot = store.snapshot();
    store.put(Arc::new(person("B", 2.0))).unwrap();
    store.remove(&FactId::new("Person~A")).unwrap();
    store.restore(snapshot);
    assert!(store.get(&FactId::new("Person~A")).unwrap().is_some());
    assert!(store.get(&FactId::new("Person~B")).unwrap().is_none());
}

#[test]
fn export_import_preserves_facts() {
    let store = MemoryStorage::with_facts([person("A", 1.0), person("B", 2.0)]);
    let bytes = store.export().unwrap();
    let restored = MemoryStorage::import(&bytes).unwrap();
    assert_eq!(restored.len().unwrap(), 2);
    let b = restored.get(&FactId::new("Person~B")).unwrap().unwrap();
    assert_eq!(b.get("age"), Some(&Value::Number(2.0)));
}

#[test]
fn import_rejects_garbage() {
    assert!(matches!(
        MemoryStorage::import(&[0xc1, 0x00]),
        Err(StorageError::Decode(_))
    ));
}
