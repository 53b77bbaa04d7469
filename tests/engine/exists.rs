//! Integration tests for EXISTS and NOT EXISTS conditions kept current by exists nodes

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_engine::{Compensation, EngineConfig, Network};
use trellis_foundation::{Fact, FactId, FieldDefinition, FieldType, TypeDefinition, Value};
use trellis_language::{BinaryOp, Expr, Job, LogicalOp, RuleDefinition, TypedVariable};
use trellis_storage::MemoryStorage;

use crate::support::capture;

fn shop() -> Network {
    shop_with(EngineConfig::default())
}

fn shop_with(config: EngineConfig) -> Network {
    let net = Network::with_config(MemoryStorage::new(), config).unwrap();
    net.register_type(
        TypeDefinition::new("Customer")
            .with_field(FieldDefinition::primary_key("id", FieldType::String))
            .with_field(FieldDefinition::new("tier", FieldType::String)),
    )
    .unwrap();
    net.register_type(
        TypeDefinition::new("Order")
            .with_field(FieldDefinition::primary_key("id", FieldType::String))
            .with_field(FieldDefinition::new("customer", FieldType::String)),
    )
    .unwrap();
    net
}

fn customer(net: &Network, id: &str) -> Fact {
    net.build_fact(
        "Customer",
        vec![("id".into(), Value::from(id)), ("tier".into(), Value::from("basic"))],
    )
    .unwrap()
}

fn order(net: &Network, id: &str, customer: &str) -> Fact {
    net.build_fact(
        "Order",
        vec![("id".into(), Value::from(id)), ("customer".into(), Value::from(customer))],
    )
    .unwrap()
}

fn orders_of_c() -> Expr {
    Expr::Exists {
        variable: "o".into(),
        type_name: "Order".into(),
        condition: Box::new(Expr::binary(
            BinaryOp::Eq,
            Expr::field("o", "customer"),
            Expr::field("c", "id"),
        )),
    }
}

/// `{c: Customer} / EXISTS (o: Order / o.customer == c.id)` printing `c.id`.
fn has_order() -> RuleDefinition {
    RuleDefinition::new("has_order", vec![TypedVariable::new("c", "Customer")])
        .with_condition(orders_of_c())
        .with_action(Job::new("print", vec![Expr::field("c", "id")]))
}

fn without_orders() -> RuleDefinition {
    RuleDefinition::new("without_orders", vec![TypedVariable::new("c", "Customer")])
        .with_condition(Expr::negate(orders_of_c()))
        .with_action(Job::new("print", vec![Expr::field("c", "id")]))
}

fn commit(net: &Network, facts: impl IntoIterator<Item = Fact>) -> trellis_engine::CommitReport {
    let mut tx = net.begin_transaction();
    for fact in facts {
        tx.submit(fact).unwrap();
    }
    tx.commit().unwrap()
}

fn retract(net: &Network, id: &str) {
    let mut tx = net.begin_transaction();
    tx.retract(FactId::new(id)).unwrap();
    tx.commit().unwrap();
}

// =============================================================================
// EXISTS
// =============================================================================

#[test]
fn witness_arriving_after_the_customer_activates() {
    let net = shop();
    let printed = capture(&net);
    net.add_rule(&has_order()).unwrap();

    commit(&net, [customer(&net, "C1")]);
    assert!(net.activations().is_empty());

    let report = commit(&net, [order(&net, "O1", "C1")]);

    assert_eq!(report.fired, 1);
    let activations = net.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].fact_ids, vec![FactId::new("Customer~C1")]);
    assert_eq!(*printed.lock(), vec!["C1".to_string()]);
}

#[test]
fn retracting_the_last_witness_retracts_the_activation() {
    let net = shop();
    let seen = Arc::new(Mutex::new(Vec::<Compensation>::new()));
    let sink = Arc::clone(&seen);
    net.set_retraction_handler(move |c| sink.lock().push(c.clone()));
    net.add_rule(&has_order()).unwrap();

    commit(&net, [order(&net, "O1", "C1")]);
    commit(&net, [customer(&net, "C1")]);
    assert_eq!(net.activations().len(), 1);

    retract(&net, "Order~O1");

    assert!(net.activations().is_empty());
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(&*seen[0].rule, "has_order");
    assert_eq!(seen[0].fact_ids, vec![FactId::new("Customer~C1")]);
}

#[test]
fn activation_holds_while_any_witness_remains() {
    let net = shop();
    net.add_rule(&has_order()).unwrap();
    let report = commit(
        &net,
        [
            customer(&net, "C1"),
            order(&net, "O1", "C1"),
            order(&net, "O2", "C1"),
            order(&net, "O3", "C2"),
        ],
    );
    assert_eq!(report.fired, 1);

    retract(&net, "Order~O1");
    assert_eq!(net.activations().len(), 1);
    retract(&net, "Order~O3");
    assert_eq!(net.activations().len(), 1);
    retract(&net, "Order~O2");
    assert!(net.activations().is_empty());

    let report = commit(&net, [order(&net, "O4", "C1")]);
    assert_eq!(report.fired, 1);
    assert_eq!(net.activations().len(), 1);
}

#[test]
fn moving_an_order_moves_the_activation() {
    let net = shop();
    net.add_rule(&has_order()).unwrap();
    commit(&net, [customer(&net, "C1"), customer(&net, "C2"), order(&net, "O1", "C1")]);
    assert_eq!(net.activations()[0].fact_ids, vec![FactId::new("Customer~C1")]);

    commit(&net, [order(&net, "O1", "C2")]);

    let activations = net.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].fact_ids, vec![FactId::new("Customer~C2")]);
}

#[test]
fn exists_combines_with_alpha_tests() {
    let net = shop();
    let rule = RuleDefinition::new("gold_buyer", vec![TypedVariable::new("c", "Customer")]).with_condition(
        Expr::logical(
            LogicalOp::And,
            Expr::binary(BinaryOp::Eq, Expr::field("c", "tier"), Expr::string("gold")),
            orders_of_c(),
        ),
    );
    net.add_rule(&rule).unwrap();
    let gold = net
        .build_fact(
            "Customer",
            vec![("id".into(), Value::from("G")), ("tier".into(), Value::from("gold"))],
        )
        .unwrap();

    commit(&net, [gold, customer(&net, "C1"), order(&net, "O1", "G"), order(&net, "O2", "C1")]);

    let activations = net.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].fact_ids, vec![FactId::new("Customer~G")]);
    assert_eq!(net.summary().exists_nodes, 1);
}

#[test]
fn rule_added_later_sees_existing_witnesses() {
    let net = shop();
    commit(&net, [order(&net, "O1", "C1"), customer(&net, "C1"), customer(&net, "C2")]);

    let report = net.add_rule(&has_order()).unwrap();

    assert_eq!(report.fired, 1);
    assert_eq!(net.activations()[0].fact_ids, vec![FactId::new("Customer~C1")]);
}

// =============================================================================
// NOT EXISTS
// =============================================================================

#[test]
fn not_exists_follows_the_witnesses() {
    let net = shop();
    let printed = capture(&net);
    net.add_rule(&without_orders()).unwrap();

    let report = commit(&net, [customer(&net, "C1")]);
    assert_eq!(report.fired, 1);

    commit(&net, [order(&net, "O1", "C1")]);
    assert!(net.activations().is_empty());

    let report = commit(&net, [order(&net, "O2", "C1")]);
    assert_eq!(report.fired, 0);

    retract(&net, "Order~O1");
    assert!(net.activations().is_empty());
    let report = {
        let mut tx = net.begin_transaction();
        tx.retract(FactId::new("Order~O2")).unwrap();
        tx.commit().unwrap()
    };
    assert_eq!(report.fired, 1);
    assert_eq!(net.activations().len(), 1);
    assert_eq!(*printed.lock(), vec!["C1".to_string(), "C1".to_string()]);
}

#[test]
fn failed_commit_restores_exists_memories() {
    let net = shop_with(EngineConfig::default().with_max_activations(1));
    net.add_rule(&has_order()).unwrap();
    commit(&net, [customer(&net, "C1"), order(&net, "O1", "C1")]);

    let mut tx = net.begin_transaction();
    tx.retract(FactId::new("Order~O1")).unwrap();
    for (c, o) in [("C2", "O2"), ("C3", "O3")] {
        tx.submit(customer(&net, c)).unwrap();
        tx.submit(order(&net, o, c)).unwrap();
    }
    assert!(tx.commit().is_err());

    let activations = net.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].fact_ids, vec![FactId::new("Customer~C1")]);

    retract(&net, "Order~O1");
    assert!(net.activations().is_empty());
}
