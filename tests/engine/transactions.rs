//! Integration tests for transactions: buffering, verification, rollback

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use trellis_engine::{Compensation, EngineConfig, Network, TransactionOptions};
use trellis_foundation::{ErrorKind, Fact, FactId, FieldDefinition, FieldType, TypeDefinition, Value};
use trellis_language::{BinaryOp, Expr, FieldInit, Job, RuleDefinition, TypedVariable};
use trellis_storage::{MemoryStorage, Storage, StorageResult};

use crate::support::{adult_rule, alert_type, capture, network, person, person_type, sensor, sensor_type};

/// Accepts writes of one type without keeping them.
struct LossyStorage {
    inner: MemoryStorage,
    drops: &'static str,
}

impl Storage for LossyStorage {
    fn put(&self, fact: Arc<Fact>) -> StorageResult<Option<Arc<Fact>>> {
        if fact.type_name() == self.drops {
            return Ok(None);
        }
        self.inner.put(fact)
    }

    fn get(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        self.inner.get(id)
    }

    fn remove(&self, id: &FactId) -> StorageResult<Option<Arc<Fact>>> {
        self.inner.remove(id)
    }

    fn facts_of_type(&self, type_name: &str) -> StorageResult<Vec<Arc<Fact>>> {
        self.inner.facts_of_type(type_name)
    }

    fn len(&self) -> StorageResult<usize> {
        self.inner.len()
    }

    fn clear(&self) -> StorageResult<()> {
        self.inner.clear()
    }
}

fn lossy_network(options: TransactionOptions) -> Network {
    let storage = LossyStorage {
        inner: MemoryStorage::new(),
        drops: "Sensor",
    };
    let net = Network::with_config(storage, EngineConfig::default().with_transactions(options)).unwrap();
    for def in [person_type(), sensor_type(), alert_type()] {
        net.register_type(def).unwrap();
    }
    net
}

fn quick_retries() -> TransactionOptions {
    TransactionOptions::default()
        .with_max_verify_retries(2)
        .with_verify_retry_delay(Duration::from_millis(1))
}

// =============================================================================
// Buffering
// =============================================================================

#[test]
fn nothing_is_visible_before_commit() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();

    let id = FactId::new("Person~A");
    assert!(tx.get(&id).unwrap().is_some());
    assert!(net.fact(&id).unwrap().is_none());
    assert_eq!(tx.pending(), 1);

    tx.commit().unwrap();
    assert!(net.fact(&id).unwrap().is_some());
}

#[test]
fn pending_retraction_hides_stored_fact() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.commit().unwrap();

    let id = FactId::new("Person~A");
    let mut tx = net.begin_transaction();
    tx.retract(id.clone()).unwrap();
    assert!(tx.get(&id).unwrap().is_none());
    assert!(net.fact(&id).unwrap().is_some());
}

#[test]
fn rollback_discards_and_closes() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.rollback().unwrap();

    assert!(!tx.is_open());
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
    let err = tx.submit(person(&net, "B", 1.0)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TransactionClosed));
    assert!(matches!(tx.rollback().unwrap_err().kind, ErrorKind::TransactionClosed));
}

#[test]
fn committed_transaction_is_closed() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.commit().unwrap();
    assert!(matches!(tx.commit().unwrap_err().kind, ErrorKind::TransactionClosed));
    assert!(matches!(tx.retract(FactId::new("Person~A")).unwrap_err().kind, ErrorKind::TransactionClosed));
}

#[test]
fn resubmission_replaces_previous_version() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 10.0)).unwrap();
    tx.submit(person(&net, "A", 20.0)).unwrap();
    tx.commit().unwrap();

    let stored = net.fact(&FactId::new("Person~A")).unwrap().unwrap();
    assert_eq!(stored.get("age"), Some(&Value::Number(20.0)));
    assert_eq!(*printed.lock(), vec!["A".to_string()]);
}

#[test]
fn retracting_unknown_identity_is_a_no_op() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.retract(FactId::new("Person~ghost")).unwrap();
    let report = tx.commit().unwrap();
    assert_eq!(report.retracted, 0);
}

// =============================================================================
// Submission validation
// =============================================================================

#[test]
fn submit_rejects_undeclared_type() {
    let net = network();
    let mut tx = net.begin_transaction();
    let err = tx.submit(Fact::new(FactId::new("Ghost_1"), "Ghost")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(ref name) if name == "Ghost"));
}

#[test]
fn submit_rejects_missing_fields() {
    let net = network();
    let mut tx = net.begin_transaction();
    let fact = Fact::new(FactId::new("Person~A"), "Person").with_field("id", "A");
    let err = tx.submit(fact).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FactValidation { .. }));
    assert_eq!(tx.pending(), 0);
}

#[test]
fn submit_rejects_identity_not_matching_primary_key() {
    let net = network();
    let mut tx = net.begin_transaction();
    let fact = Fact::new(FactId::new("Person~X"), "Person")
        .with_field("id", "Y")
        .with_field("age", 3.0);
    let err = tx.submit(fact).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FactValidation { .. }));
}

// =============================================================================
// Verification and rollback
// =============================================================================

#[test]
fn unverifiable_write_rolls_back_the_whole_commit() {
    let net = lossy_network(quick_retries());
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.submit(sensor(&net, "S1", 20.0)).unwrap();
    let err = tx.commit().unwrap_err();

    assert!(matches!(
        err.kind,
        ErrorKind::VerificationFailed { ref fact, attempts: 3 } if fact.as_str() == "Sensor~S1"
    ));
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
    assert!(net.activations().is_empty());
    assert!(printed.lock().is_empty());
    assert!(!tx.is_open());
}

#[test]
fn verification_can_be_switched_off() {
    let net = lossy_network(quick_retries().with_verify_on_commit(false));
    let mut tx = net.begin_transaction();
    tx.submit(sensor(&net, "S1", 20.0)).unwrap();
    let report = tx.commit().unwrap();
    assert_eq!(report.asserted, 1);
}

#[test]
fn per_transaction_options_override_defaults() {
    let net = lossy_network(TransactionOptions::default());
    let mut tx = net.begin_transaction_with(quick_retries().with_max_verify_retries(0));
    tx.submit(sensor(&net, "S1", 20.0)).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::VerificationFailed { attempts: 1, .. }));
}

#[test]
fn expired_transaction_cannot_commit() {
    let net = network();
    let mut tx = net.begin_transaction_with(
        TransactionOptions::default().with_submission_timeout(Duration::from_millis(1)),
    );
    tx.submit(person(&net, "A", 30.0)).unwrap();
    thread::sleep(Duration::from_millis(20));

    let err = tx.commit().unwrap_err();

    assert!(matches!(err.kind, ErrorKind::SubmissionTimeout { .. }));
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
}

#[test]
fn runaway_rule_trips_the_kill_switch() {
    let net = Network::with_config(MemoryStorage::new(), EngineConfig::default().with_max_activations(5)).unwrap();
    net.register_type(
        TypeDefinition::new("Counter")
            .with_field(FieldDefinition::primary_key("id", FieldType::String))
            .with_field(FieldDefinition::new("n", FieldType::Number)),
    )
    .unwrap();
    let bump: FieldInit = (
        "n".into(),
        Expr::binary(BinaryOp::Add, Expr::field("c", "n"), Expr::Number(1.0)),
    );
    let rule = RuleDefinition::new("count_forever", vec![TypedVariable::new("c", "Counter")])
        .with_condition(Expr::binary(BinaryOp::Lt, Expr::field("c", "n"), Expr::Number(1_000.0)))
        .with_action(Job::new(
            "Update",
            vec![Expr::UpdateWithModifications {
                variable: "c".into(),
                modifications: vec![bump],
            }],
        ));
    net.add_rule(&rule).unwrap();

    let counter = net
        .build_fact("Counter", vec![("id".into(), Value::from("C")), ("n".into(), Value::Number(0.0))])
        .unwrap();
    let mut tx = net.begin_transaction();
    tx.submit(counter).unwrap();
    let err = tx.commit().unwrap_err();

    assert!(matches!(err.kind, ErrorKind::LimitExceeded(_)));
    assert!(err.to_string().contains("max activations (5)"));
    assert!(net.fact(&FactId::new("Counter~C")).unwrap().is_none());
    assert!(net.activations().is_empty());
}

fn limited_network(max_activations: usize) -> Network {
    let net = Network::with_config(
        MemoryStorage::new(),
        EngineConfig::default().with_max_activations(max_activations),
    )
    .unwrap();
    for def in [person_type(), sensor_type(), alert_type()] {
        net.register_type(def).unwrap();
    }
    net
}

#[test]
fn failed_commit_prints_nothing() {
    let net = limited_network(1);
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.submit(person(&net, "B", 40.0)).unwrap();
    let err = tx.commit().unwrap_err();

    assert!(matches!(err.kind, ErrorKind::LimitExceeded(_)));
    assert!(printed.lock().is_empty());
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
    assert!(net.activations().is_empty());
}

#[test]
fn failed_commit_calls_no_xuple_handler() {
    let net = limited_network(1);
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    net.set_xuple_handler(move |space, fact, _triggering| {
        sink.lock().push((space.to_string(), fact.id().clone()));
        Ok(())
    });
    net.add_rule(
        &RuleDefinition::new("publish", vec![TypedVariable::new("p", "Person")])
            .with_action(Job::new("Xuple", vec![Expr::string("people"), Expr::var("p")])),
    )
    .unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.submit(person(&net, "B", 40.0)).unwrap();
    assert!(tx.commit().is_err());
    assert!(published.lock().is_empty());

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.commit().unwrap();
    assert_eq!(*published.lock(), vec![("people".to_string(), FactId::new("Person~A"))]);
}

#[test]
fn failed_commit_reports_no_retractions() {
    let net = limited_network(1);
    let seen = Arc::new(Mutex::new(Vec::<Compensation>::new()));
    let sink = Arc::clone(&seen);
    net.set_retraction_handler(move |c| sink.lock().push(c.clone()));
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.commit().unwrap();

    let mut tx = net.begin_transaction();
    tx.retract(FactId::new("Person~A")).unwrap();
    tx.submit(person(&net, "B", 40.0)).unwrap();
    tx.submit(person(&net, "C", 50.0)).unwrap();
    assert!(tx.commit().is_err());

    assert!(seen.lock().is_empty());
    assert_eq!(net.activations().len(), 1);
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_some());
}

// =============================================================================
// Concurrency and shutdown
// =============================================================================

#[test]
fn concurrent_commits_serialize() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    thread::scope(|scope| {
        for worker in 0..4 {
            let net = &net;
            scope.spawn(move || {
                for i in 0..10 {
                    let mut tx = net.begin_transaction();
                    tx.submit(person(net, &format!("W{worker}_{i}"), 30.0)).unwrap();
                    tx.commit().unwrap();
                }
            });
        }
    });

    assert_eq!(net.summary().facts, 40);
    assert_eq!(net.activations().len(), 40);
    assert_eq!(printed.lock().len(), 40);
}

#[test]
fn shut_down_network_refuses_transactions() {
    let net = network();
    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();

    net.shutdown();

    assert!(net.is_shut_down());
    assert!(matches!(tx.commit().unwrap_err().kind, ErrorKind::NetworkShutdown));
    let mut late = net.begin_transaction();
    assert!(matches!(
        late.submit(person(&net, "B", 1.0)).unwrap_err().kind,
        ErrorKind::NetworkShutdown
    ));
}
