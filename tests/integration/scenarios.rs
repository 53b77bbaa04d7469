//! End-to-end scenarios: schema, rule, facts, observed effects

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use trellis::engine::compiler::AlphaCondition;
use trellis::engine::decompose::Operand;
use trellis::engine::{AtomicStep, CompiledRule, DecomposedChain};
use trellis::foundation::{Fact, FieldDefinition, FieldType, TypeDefinition};
use trellis::language::{BinaryOp, Expr, Job, RuleDefinition, TypedVariable};
use trellis::{ErrorKind, FactId, MemoryStorage, Network, Value};

use crate::{capture, init_tracing};

fn network(types: impl IntoIterator<Item = TypeDefinition>) -> Network {
    init_tracing();
    let net = Network::new(MemoryStorage::new());
    for def in types {
        net.register_type(def).unwrap();
    }
    net
}

fn fact(net: &Network, type_name: &str, fields: &[(&str, Value)]) -> Fact {
    let fields = fields
        .iter()
        .map(|(name, value)| (Arc::from(*name), value.clone()))
        .collect();
    net.build_fact(type_name, fields).unwrap()
}

fn commit(net: &Network, facts: Vec<Fact>) -> trellis::CommitReport {
    let mut tx = net.begin_transaction();
    for fact in facts {
        tx.submit(fact).unwrap();
    }
    tx.commit().unwrap()
}

// =============================================================================
// Single variable
// =============================================================================

#[test]
fn adult_rule_fires_once() {
    let net = network([TypeDefinition::new("Person")
        .with_field(FieldDefinition::primary_key("id", FieldType::String))
        .with_field(FieldDefinition::new("age", FieldType::Number))]);
    let printed = capture(&net);
    let rule = RuleDefinition::new("adult", vec![TypedVariable::new("p", "Person")])
        .with_condition(Expr::binary(BinaryOp::Ge, Expr::field("p", "age"), Expr::Number(18.0)))
        .with_action(Job::new("print", vec![Expr::field("p", "id")]));
    net.add_rule(&rule).unwrap();

    let a = fact(&net, "Person", &[("id", "A".into()), ("age", 17.0.into())]);
    let b = fact(&net, "Person", &[("id", "B".into()), ("age", 21.0.into())]);
    commit(&net, vec![a, b]);

    assert_eq!(*printed.lock(), vec!["B".to_string()]);
    let tokens = net.terminal_tokens("adult");
    assert_eq!(tokens.len(), 1);
    let bound = tokens[0].bindings.get("p").unwrap();
    assert_eq!(bound.id().as_str(), "Person~B");
}

// =============================================================================
// Join
// =============================================================================

#[test]
fn login_joins_its_user() {
    let net = network([
        TypeDefinition::new("User")
            .with_field(FieldDefinition::primary_key("id", FieldType::String))
            .with_field(FieldDefinition::new("name", FieldType::String)),
        TypeDefinition::new("Login")
            .with_field(FieldDefinition::primary_key("email", FieldType::String))
            .with_field(FieldDefinition::new("user", FieldType::parse("User"))),
    ]);
    let printed = capture(&net);
    let message = Expr::binary(
        BinaryOp::Add,
        Expr::binary(BinaryOp::Add, Expr::field("u", "name"), Expr::string(" logged via ")),
        Expr::field("l", "email"),
    );
    let rule = RuleDefinition::new(
        "match",
        vec![TypedVariable::new("u", "User"), TypedVariable::new("l", "Login")],
    )
    .with_condition(Expr::binary(BinaryOp::Eq, Expr::field("l", "user"), Expr::var("u")))
    .with_action(Job::new("print", vec![message]));
    net.add_rule(&rule).unwrap();

    let user = fact(&net, "User", &[("id", "alice".into()), ("name", "Alice".into())]);
    let login = fact(&net, "Login", &[("email", "a@x".into()), ("user", "User~alice".into())]);
    commit(&net, vec![user, login]);

    assert_eq!(*printed.lock(), vec!["Alice logged via a@x".to_string()]);
}

// =============================================================================
// Arithmetic
// =============================================================================

#[test]
fn arithmetic_condition_is_decomposed() {
    let net = network([TypeDefinition::new("Product")
        .with_field(FieldDefinition::primary_key("sku", FieldType::String))
        .with_field(FieldDefinition::new("price", FieldType::Number))
        .with_field(FieldDefinition::new("qty", FieldType::Number))]);
    let printed = capture(&net);
    let total = Expr::binary(
        BinaryOp::Add,
        Expr::binary(BinaryOp::Mul, Expr::field("p", "price"), Expr::field("p", "qty")),
        Expr::Number(10.0),
    );
    let rule = RuleDefinition::new("hot", vec![TypedVariable::new("p", "Product")])
        .with_condition(Expr::binary(BinaryOp::Gt, total, Expr::Number(100.0)))
        .with_action(Job::new("print", vec![Expr::field("p", "sku")]));
    net.add_rule(&rule).unwrap();

    let x = fact(&net, "Product", &[("sku", "X".into()), ("price", 25.0.into()), ("qty", 3.0.into())]);
    assert_eq!(commit(&net, vec![x]).fired, 0);
    let y = fact(&net, "Product", &[("sku", "Y".into()), ("price", 30.0.into()), ("qty", 4.0.into())]);
    assert_eq!(commit(&net, vec![y]).fired, 1);

    assert_eq!(*printed.lock(), vec!["Y".to_string()]);
    let metrics = net.decomposition_metrics().rule("hot").unwrap();
    assert_eq!(metrics.chain_length, 3);
    assert_eq!(metrics.max_dependency_depth, 2);
}

// =============================================================================
// Inline facts
// =============================================================================

#[test]
fn inline_fact_reaches_the_xuple_callback() {
    let net = network([
        TypeDefinition::new("Sensor")
            .with_field(FieldDefinition::primary_key("id", FieldType::String))
            .with_field(FieldDefinition::new("temp", FieldType::Number)),
        TypeDefinition::new("Alert")
            .with_field(FieldDefinition::new("level", FieldType::String))
            .with_field(FieldDefinition::new("id", FieldType::String))
            .with_field(FieldDefinition::new("temp", FieldType::Number)),
    ]);
    let calls: Arc<Mutex<Vec<(String, Arc<Fact>, Vec<FactId>)>>> = Arc::default();
    let seen = Arc::clone(&calls);
    net.set_xuple_handler(move |space, fact, triggering| {
        let ids = triggering.iter().map(|f| f.id().clone()).collect();
        seen.lock().push((space.to_string(), Arc::clone(fact), ids));
        Ok(())
    });
    let alert = Expr::InlineFact {
        type_name: "Alert".into(),
        fields: vec![
            ("level".into(), Expr::string("HIGH")),
            ("id".into(), Expr::field("s", "id")),
            ("temp".into(), Expr::field("s", "temp")),
        ],
    };
    let rule = RuleDefinition::new("high", vec![TypedVariable::new("s", "Sensor")])
        .with_condition(Expr::binary(BinaryOp::Gt, Expr::field("s", "temp"), Expr::Number(40.0)))
        .with_action(Job::new("Xuple", vec![Expr::string("alerts"), alert]));
    net.add_rule(&rule).unwrap();

    let s1 = fact(&net, "Sensor", &[("id", "S1".into()), ("temp", 45.0.into())]);
    commit(&net, vec![s1]);

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (space, alert, triggering) = &calls[0];
    assert_eq!(space, "alerts");
    assert_eq!(alert.type_name(), "Alert");
    assert_eq!(alert.get("level"), Some(&Value::from("HIGH")));
    assert_eq!(alert.get("id"), Some(&Value::from("S1")));
    assert_eq!(alert.get("temp"), Some(&Value::Number(45.0)));
    assert_eq!(triggering, &vec![FactId::new("Sensor~S1")]);
}

// =============================================================================
// Update
// =============================================================================

#[test]
fn update_keeps_identity_and_settles() {
    let net = network([TypeDefinition::new("Task")
        .with_field(FieldDefinition::primary_key("id", FieldType::String))
        .with_field(FieldDefinition::new("status", FieldType::String))]);
    let rule = RuleDefinition::new("close", vec![TypedVariable::new("t", "Task")])
        .with_condition(Expr::binary(BinaryOp::Eq, Expr::field("t", "status"), Expr::string("ready")))
        .with_action(Job::new(
            "Update",
            vec![Expr::UpdateWithModifications {
                variable: "t".into(),
                modifications: vec![("status".into(), Expr::string("done"))],
            }],
        ));
    net.add_rule(&rule).unwrap();

    let task = fact(&net, "Task", &[("id", "T1".into()), ("status", "ready".into())]);
    let report = commit(&net, vec![task]);

    assert_eq!(report.fired, 1);
    let stored = net.fact(&FactId::new("Task~T1")).unwrap().unwrap();
    assert_eq!(stored.id().as_str(), "Task~T1");
    assert_eq!(stored.get("status"), Some(&Value::from("done")));
    assert_eq!(net.summary().facts, 1);
    assert!(net.activations().is_empty());
}

// =============================================================================
// Circular decomposition
// =============================================================================

#[test]
fn circular_decomposition_is_rejected() {
    let net = network([TypeDefinition::new("Product")
        .with_field(FieldDefinition::primary_key("sku", FieldType::String))
        .with_field(FieldDefinition::new("price", FieldType::Number))]);
    let chain = DecomposedChain {
        variable: "p".into(),
        steps: vec![
            AtomicStep::new(
                "temp_a",
                BinaryOp::Add,
                Operand::Temp("temp_b".into()),
                Operand::Literal(Expr::Number(1.0)),
            ),
            AtomicStep::new(
                "temp_b",
                BinaryOp::Mul,
                Operand::Temp("temp_a".into()),
                Operand::Field {
                    variable: "p".into(),
                    field: "price".into(),
                },
            ),
        ],
        comparison: Expr::binary(BinaryOp::Gt, Expr::var("temp_b"), Expr::Number(100.0)),
    };
    let mut alpha = BTreeMap::new();
    alpha.insert(Arc::from("p"), vec![AlphaCondition::Decomposed(chain)]);
    let rule = CompiledRule {
        id: "loop".into(),
        variables: vec![TypedVariable::new("p", "Product")],
        alpha,
        join_conditions: Vec::new(),
        exists: Vec::new(),
        actions: vec![Job::new("print", vec![Expr::field("p", "sku")])],
    };

    let err = net.add_compiled_rule(rule).unwrap_err();

    let ErrorKind::CircularDependency { path } = &err.kind else {
        panic!("expected a circular dependency, got {err}");
    };
    assert!(path.iter().any(|n| n == "temp_a"));
    assert!(path.iter().any(|n| n == "temp_b"));
    assert!(err.to_string().contains("temp_a"));
    assert!(net.rule_ids().is_empty());
    let metrics = net.decomposition_metrics().rule("loop").unwrap();
    assert!(metrics.has_circular_deps);
}
