//! Integration tests for rule actions and logical support

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_engine::{ActionHandler, EngineConfig, ExecutionContext, Network};
use trellis_foundation::{Error, ErrorKind, FactId, Result, Value};
use trellis_language::{BinaryOp, Expr, Job, RuleDefinition, TypedVariable};
use trellis_storage::MemoryStorage;

use crate::support::{capture, commit, network, person, person_type, sensor};

/// Records every call's rule and arguments.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ActionHandler for Recorder {
    fn name(&self) -> &str {
        "record"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.calls.lock().push((ctx.rule().to_string(), args.to_vec()));
        Ok(())
    }
}

/// Sends each call's first argument out once the commit succeeds.
#[derive(Default)]
struct Notifier {
    sent: Arc<Mutex<Vec<Value>>>,
}

impl ActionHandler for Notifier {
    fn name(&self) -> &str {
        "notify"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let sent = Arc::clone(&self.sent);
        let value = args.first().cloned().unwrap_or(Value::Nil);
        ctx.defer(move || {
            sent.lock().push(value);
            Ok(())
        });
        Ok(())
    }
}

struct Failing;

impl ActionHandler for Failing {
    fn name(&self) -> &str {
        "fail"
    }

    fn execute(&self, _args: &[Value], _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        Err(Error::internal("boom"))
    }
}

fn on_person(id: &str) -> RuleDefinition {
    RuleDefinition::new(id, vec![TypedVariable::new("p", "Person")])
}

fn alert_for(var: &str) -> Expr {
    Expr::InlineFact {
        type_name: "Alert".into(),
        fields: vec![
            ("level".into(), Expr::string("HIGH")),
            ("sensor".into(), Expr::field(var, "id")),
        ],
    }
}

fn alarm_rule() -> RuleDefinition {
    RuleDefinition::new("alarm", vec![TypedVariable::new("s", "Sensor")])
        .with_condition(Expr::binary(BinaryOp::Gt, Expr::field("s", "temp"), Expr::Number(40.0)))
        .with_action(Job::new("Insert", vec![alert_for("s")]))
}

// =============================================================================
// Built-ins
// =============================================================================

#[test]
fn print_writes_each_argument_on_its_own_line() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(
        &on_person("greet").with_action(Job::new(
            "print",
            vec![Expr::string("hello"), Expr::field("p", "id")],
        )),
    )
    .unwrap();

    commit(&net, [person(&net, "A", 30.0)]);

    assert_eq!(*printed.lock(), vec!["hello".to_string(), "A".to_string()]);
}

#[test]
fn log_action_succeeds() {
    let net = network();
    net.add_rule(&on_person("audit").with_action(Job::new("log", vec![Expr::field("p", "id")])))
        .unwrap();
    let report = commit(&net, [person(&net, "A", 30.0)]);
    assert_eq!(report.fired, 1);
    assert!(report.is_clean());
}

#[test]
fn unknown_action_is_skipped() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(
        &on_person("partly_known")
            .with_action(Job::new("teleport", vec![]))
            .with_action(Job::new("print", vec![Expr::field("p", "id")])),
    )
    .unwrap();

    let report = commit(&net, [person(&net, "A", 30.0)]);

    assert!(report.is_clean());
    assert_eq!(*printed.lock(), vec!["A".to_string()]);
}

#[test]
fn custom_handler_receives_evaluated_arguments() {
    let net = network();
    let recorder = Arc::new(Recorder::default());
    net.register_action(Arc::clone(&recorder) as Arc<dyn ActionHandler>);
    net.add_rule(&on_person("track").with_action(Job::new(
        "record",
        vec![
            Expr::field("p", "id"),
            Expr::binary(BinaryOp::Mul, Expr::field("p", "age"), Expr::Number(2.0)),
        ],
    )))
    .unwrap();

    commit(&net, [person(&net, "A", 21.0)]);

    let calls = recorder.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "track");
    assert_eq!(calls[0].1, vec![Value::from("A"), Value::Number(42.0)]);
}

#[test]
fn deferred_handler_effects_wait_for_a_successful_commit() {
    let net = Network::with_config(MemoryStorage::new(), EngineConfig::default().with_max_activations(1)).unwrap();
    net.register_type(person_type()).unwrap();
    let notifier = Arc::new(Notifier::default());
    let sent = Arc::clone(&notifier.sent);
    net.register_action(notifier as Arc<dyn ActionHandler>);
    net.add_rule(&on_person("welcome").with_action(Job::new("notify", vec![Expr::field("p", "id")])))
        .unwrap();

    let mut tx = net.begin_transaction();
    tx.submit(person(&net, "A", 30.0)).unwrap();
    tx.submit(person(&net, "B", 40.0)).unwrap();
    assert!(tx.commit().is_err());
    assert!(sent.lock().is_empty());

    commit(&net, [person(&net, "B", 40.0)]);
    assert_eq!(*sent.lock(), vec![Value::from("B")]);
}

#[test]
fn failed_action_skips_the_rest_of_its_list() {
    let net = network();
    let printed = capture(&net);
    net.register_action(Arc::new(Failing));
    net.add_rule(
        &on_person("fragile")
            .with_action(Job::new("print", vec![Expr::string("before")]))
            .with_action(Job::new("fail", vec![]))
            .with_action(Job::new("print", vec![Expr::string("after")])),
    )
    .unwrap();

    let report = commit(&net, [person(&net, "A", 30.0)]);

    assert_eq!(report.fired, 1);
    assert_eq!(*printed.lock(), vec!["before".to_string()]);
    assert_eq!(report.action_errors.len(), 1);
    let err = &report.action_errors[0];
    assert!(matches!(err.kind, ErrorKind::Internal(_)));
    assert_eq!(err.context.as_ref().and_then(|c| c.rule.as_deref()), Some("fragile"));
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_some());
}

#[test]
fn argument_errors_are_reported() {
    let net = network();
    net.add_rule(&on_person("broken").with_action(Job::new(
        "print",
        vec![Expr::binary(BinaryOp::Div, Expr::field("p", "age"), Expr::Number(0.0))],
    )))
    .unwrap();

    let report = commit(&net, [person(&net, "A", 30.0)]);

    assert_eq!(report.action_errors.len(), 1);
    assert!(matches!(report.action_errors[0].kind, ErrorKind::DivisionByZero));
}

// =============================================================================
// Insert and logical support
// =============================================================================

#[test]
fn inserted_fact_is_asserted_and_chains() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&alarm_rule()).unwrap();
    net.add_rule(
        &RuleDefinition::new("announce", vec![TypedVariable::new("a", "Alert")])
            .with_action(Job::new("print", vec![Expr::field("a", "sensor")])),
    )
    .unwrap();

    let report = commit(&net, [sensor(&net, "S1", 45.0), sensor(&net, "S2", 10.0)]);

    assert_eq!(report.fired, 2);
    assert_eq!(*printed.lock(), vec!["S1".to_string()]);
    let alert = net.fact(&FactId::new("Alert_1")).unwrap().unwrap();
    assert_eq!(alert.get("level"), Some(&Value::from("HIGH")));
}

#[test]
fn retracting_support_retracts_inserted_facts() {
    let net = network();
    net.add_rule(&alarm_rule()).unwrap();
    commit(&net, [sensor(&net, "S1", 45.0)]);
    let alert = FactId::new("Alert_1");
    assert!(net.fact(&alert).unwrap().is_some());

    let mut tx = net.begin_transaction();
    tx.retract(FactId::new("Sensor~S1")).unwrap();
    let report = tx.commit().unwrap();

    assert_eq!(report.retracted, 2);
    assert!(net.fact(&alert).unwrap().is_none());
}

#[test]
fn support_ends_when_the_condition_stops_holding() {
    let net = network();
    net.add_rule(&alarm_rule()).unwrap();
    commit(&net, [sensor(&net, "S1", 45.0)]);

    commit(&net, [sensor(&net, "S1", 20.0)]);

    assert!(net.fact(&FactId::new("Alert_1")).unwrap().is_none());
    assert!(net.activations().is_empty());
    assert_eq!(net.summary().facts, 1);
}

#[test]
fn inserting_an_existing_identity_fails() {
    let net = network();
    commit(&net, [person(&net, "A", 30.0)]);
    let clone_a = Expr::InlineFact {
        type_name: "Person".into(),
        fields: vec![("id".into(), Expr::string("A")), ("age".into(), Expr::Number(1.0))],
    };
    net.add_rule(
        &RuleDefinition::new("cloner", vec![TypedVariable::new("s", "Sensor")])
            .with_action(Job::new("Insert", vec![clone_a])),
    )
    .unwrap();

    let report = commit(&net, [sensor(&net, "S1", 45.0)]);

    assert_eq!(report.action_errors.len(), 1);
    assert!(matches!(report.action_errors[0].kind, ErrorKind::FactValidation { .. }));
    let a = net.fact(&FactId::new("Person~A")).unwrap().unwrap();
    assert_eq!(a.get("age"), Some(&Value::Number(30.0)));
}

// =============================================================================
// Retract and Update
// =============================================================================

#[test]
fn retract_action_removes_the_bound_fact() {
    let net = network();
    net.add_rule(
        &on_person("expire")
            .with_condition(Expr::binary(BinaryOp::Lt, Expr::field("p", "age"), Expr::Number(0.0)))
            .with_action(Job::new("Retract", vec![Expr::var("p")])),
    )
    .unwrap();

    let report = commit(&net, [person(&net, "A", -1.0), person(&net, "B", 5.0)]);

    assert_eq!(report.retracted, 1);
    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
    assert!(net.fact(&FactId::new("Person~B")).unwrap().is_some());
    assert!(net.activations().is_empty());
}

#[test]
fn modifying_the_primary_key_moves_the_fact() {
    let net = network();
    net.add_rule(
        &on_person("rename")
            .with_condition(Expr::binary(BinaryOp::Eq, Expr::field("p", "age"), Expr::Number(0.0)))
            .with_action(Job::new(
                "Update",
                vec![Expr::FactModification {
                    variable: "p".into(),
                    field: "id".into(),
                    value: Box::new(Expr::string("Renamed")),
                }],
            )),
    )
    .unwrap();

    commit(&net, [person(&net, "A", 0.0)]);

    assert!(net.fact(&FactId::new("Person~A")).unwrap().is_none());
    let renamed = net.fact(&FactId::new("Person~Renamed")).unwrap().unwrap();
    assert_eq!(renamed.get("id"), Some(&Value::from("Renamed")));
}

#[test]
fn xuple_handler_errors_are_reported() {
    let net = network();
    net.set_xuple_handler(|space, _fact, _triggering| {
        Err(Error::internal(format!("space {space} is full")))
    });
    net.add_rule(&RuleDefinition::new("publish", vec![TypedVariable::new("s", "Sensor")]).with_action(
        Job::new("Xuple", vec![Expr::string("alerts"), alert_for("s")]),
    ))
    .unwrap();

    let report = commit(&net, [sensor(&net, "S1", 45.0)]);

    assert_eq!(report.action_errors.len(), 1);
    assert!(report.action_errors[0].to_string().contains("space alerts is full"));
    assert!(net.fact(&FactId::new("Alert_1")).unwrap().is_none());
}
