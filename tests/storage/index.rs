//! Integration tests for FactIndex

use std::sync::Arc;

use trellis_foundation::{Fact, FactId, Value};
use trellis_storage::{FactIndex, MemoryStorage};

fn reading(id: &str, sensor: &str, temp: f64) -> Arc<Fact> {
    Arc::new(
        Fact::new(FactId::new(id), "Reading")
            .with_field("sensor", sensor)
            .with_field("temp", temp),
    )
}

#[test]
fn facts_by_type_and_field() {
    let mut index = FactIndex::new();
    index.insert(reading("Reading_1", "S1", 20.0));
    index.insert(reading("Reading_2", "S1", 30.0));
    index.insert(reading("Reading_3", "S2", 30.0));
    index.insert(Arc::new(Fact::new(FactId::new("Sensor~S1"), "Sensor")));

    assert_eq!(index.len(), 4);
    assert_eq!(index.facts_of_type("Reading").len(), 3);
    assert_eq!(index.facts_by_field("Reading", "sensor", &Value::from("S1")).len(), 2);
    assert_eq!(index.facts_by_field("Reading", "temp", &Value::Number(30.0)).len(), 2);
    assert!(index.facts_by_field("Sensor", "temp", &Value::Number(30.0)).is_empty());
}

#[test]
fn removing_the_last_fact_of_a_type() {
    let mut index = FactIndex::new();
    index.insert(reading("Reading_1", "S1", 20.0));
    index.remove(&FactId::new("Reading_1"));
    assert!(index.is_empty());
    assert!(index.facts_of_type("Reading").is_empty());
    assert!(!index.contains(&FactId::new("Reading_1")));
}

#[test]
fn memory_storage_field_lookup() {
    let store = MemoryStorage::with_facts([
        Fact::clone(&reading("Reading_1", "S1", 20.0)),
        Fact::clone(&reading("Reading_2", "S2", 25.0)),
    ]);
    let hits = store.facts_by_field("Reading", "sensor", &Value::from("S2"));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id().as_str(), "Reading_2");
}
