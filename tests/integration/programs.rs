//! JSON programs driven through the whole stack

use std::sync::Arc;

use parking_lot::Mutex;
use trellis::storage::Storage;
use trellis::{FactId, MemoryStorage, Network, Value};

use crate::{capture, init_tracing};

const MONITORING: &str = r#"{
    "types": [
        {"name": "Sensor", "fields": [
            {"name": "id", "type": "string", "isPrimaryKey": true},
            {"name": "temp", "type": "number"},
            {"name": "room", "type": "string"}]},
        {"name": "Room", "fields": [
            {"name": "name", "type": "string", "isPrimaryKey": true},
            {"name": "floor", "type": "number"}]},
        {"name": "Alert", "fields": [
            {"name": "sensor", "type": "Sensor"},
            {"name": "level", "type": "string"}]}
    ],
    "expressions": [
        {
            "ruleId": "overheat",
            "set": {"variables": [{"name": "s", "dataType": "Sensor"}]},
            "constraints": {"type": "comparison", "operator": "Pj0=",
                "left": {"type": "fieldAccess", "object": "s", "field": "temp"},
                "right": {"type": "number", "value": 40}},
            "action": {"jobs": [{"name": "Insert", "args": [
                {"type": "inlineFact", "typeName": "Alert", "fields": {
                    "sensor": {"type": "variable", "name": "s"},
                    "level": {"type": "string", "value": "HIGH"}}}]}]}
        },
        {
            "ruleId": "locate",
            "set": {"variables": [
                {"name": "a", "dataType": "Alert"},
                {"name": "s", "dataType": "Sensor"},
                {"name": "r", "dataType": "Room"}]},
            "constraints": [
                {"type": "comparison", "operator": "==",
                    "left": {"type": "fieldAccess", "object": "a", "field": "sensor"},
                    "right": {"type": "variable", "name": "s"}},
                {"type": "comparison", "operator": "==",
                    "left": {"type": "fieldAccess", "object": "s", "field": "room"},
                    "right": {"type": "fieldAccess", "object": "r", "field": "name"}}
            ],
            "action": {"jobs": [{"name": "print", "args": [
                {"type": "binaryOp", "operator": "+",
                    "left": {"type": "fieldAccess", "object": "a", "field": "level"},
                    "right": {"type": "fieldAccess", "object": "r", "field": "name"}}]}]}
        }
    ],
    "facts": [
        {"typeName": "Room", "fields": {"name": "lab", "floor": 2}},
        {"typeName": "Sensor", "fields": {"id": "S1", "temp": 45, "room": "lab"}},
        {"typeName": "Sensor", "fields": {"id": "S2", "temp": 12, "room": "lab"}}
    ]
}"#;

#[test]
fn program_loads_and_chains_rules() {
    init_tracing();
    let net = Network::new(MemoryStorage::new());
    let printed = capture(&net);

    let report = net.load_program_json(MONITORING).unwrap();

    assert_eq!(report.fired, 2);
    assert!(report.is_clean());
    assert_eq!(*printed.lock(), vec!["HIGHlab".to_string()]);
    assert_eq!(net.type_names().len(), 3);
    assert_eq!(net.rule_ids().len(), 2);
    let alert = net.fact(&FactId::new("Alert_1")).unwrap().unwrap();
    assert_eq!(alert.get("sensor"), Some(&Value::FactRef(FactId::new("Sensor~S1"))));
}

#[test]
fn cooling_retracts_the_derived_chain() {
    init_tracing();
    let net = Network::new(MemoryStorage::new());
    capture(&net);
    net.load_program_json(MONITORING).unwrap();
    assert_eq!(net.activations().len(), 2);

    let cooled = net
        .build_fact(
            "Sensor",
            vec![
                ("id".into(), Value::from("S1")),
                ("temp".into(), Value::Number(20.0)),
                ("room".into(), Value::from("lab")),
            ],
        )
        .unwrap();
    let mut tx = net.begin_transaction();
    tx.submit(cooled).unwrap();
    tx.commit().unwrap();

    assert!(net.activations().is_empty());
    assert!(net.fact(&FactId::new("Alert_1")).unwrap().is_none());
}

#[test]
fn reset_program_replaces_everything() {
    init_tracing();
    let net = Network::new(MemoryStorage::new());
    capture(&net);
    net.load_program_json(MONITORING).unwrap();

    let replacement = r#"{
        "resets": [{"type": "reset"}],
        "types": [{"name": "Flag", "fields": [
            {"name": "name", "type": "string", "isPrimaryKey": true}]}],
        "facts": [{"typeName": "Flag", "fields": [{"name": "name", "value": "on"}]}]
    }"#;
    net.load_program_json(replacement).unwrap();

    assert_eq!(net.type_names(), vec!["Flag".to_string()]);
    assert!(net.rule_ids().is_empty());
    assert_eq!(net.summary().facts, 1);
    assert!(net.fact(&FactId::new("Flag~on")).unwrap().is_some());
}

#[test]
fn exported_store_restores_into_a_new_network() {
    init_tracing();
    let store = Arc::new(MemoryStorage::new());
    let net = Network::new(Arc::clone(&store));
    capture(&net);
    net.load_program_json(MONITORING).unwrap();
    let bytes = store.export().unwrap();
    assert_eq!(store.len().unwrap(), 4);

    // Rules replay over the restored facts. The restored alert already holds
    // the identity `overheat` would insert, so that insert is reported.
    let restored = Network::new(MemoryStorage::import(&bytes).unwrap());
    let printed = capture(&restored);
    let mut program = trellis::language::parse_program(MONITORING).unwrap();
    program.facts.clear();
    let report = restored.load_program(&program).unwrap();

    assert_eq!(report.fired, 2);
    assert_eq!(report.action_errors.len(), 1);
    assert!(printed.lock().contains(&"HIGHlab".to_string()));
    assert_eq!(restored.summary().facts, 4);
}

#[test]
fn xuple_program_hands_facts_to_the_host() {
    init_tracing();
    let net = Network::new(MemoryStorage::new());
    let spaces: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen = Arc::clone(&spaces);
    net.set_xuple_handler(move |space, fact, _| {
        seen.lock().push(format!("{space}:{}", fact.type_name()));
        Ok(())
    });
    let program = r#"{
        "types": [
            {"name": "Order", "fields": [
                {"name": "id", "type": "string", "isPrimaryKey": true},
                {"name": "total", "type": "number"}]},
            {"name": "Review", "fields": [
                {"name": "order", "type": "string"}]}
        ],
        "expressions": [{
            "ruleId": "big_order",
            "set": {"variables": [{"name": "o", "dataType": "Order"}]},
            "constraints": {"type": "comparison", "operator": "Pg==",
                "left": {"type": "fieldAccess", "object": "o", "field": "total"},
                "right": {"type": "number", "value": 1000}},
            "action": {"job": {"name": "Xuple", "args": [
                {"type": "string", "value": "reviews"},
                {"type": "inlineFact", "typeName": "Review", "fields": {
                    "order": {"type": "fieldAccess", "object": "o", "field": "id"}}}]}}
        }],
        "facts": [
            {"typeName": "Order", "fields": {"id": "O1", "total": 2500}},
            {"typeName": "Order", "fields": {"id": "O2", "total": 10}}
        ]
    }"#;

    let report = net.load_program_json(program).unwrap();

    assert_eq!(report.fired, 1);
    assert_eq!(*spaces.lock(), vec!["reviews:Review".to_string()]);
    assert!(net.fact(&FactId::new("Review_1")).unwrap().is_none());
}
