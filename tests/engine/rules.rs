//! Integration tests for rule wiring, node sharing, and rule removal

use trellis_foundation::ErrorKind;
use trellis_language::{BinaryOp, Expr, Job, RuleDefinition, TypedVariable};

use crate::support::{adult_rule, capture, commit, network, person};

// =============================================================================
// Wiring
// =============================================================================

#[test]
fn rule_fires_for_matching_facts_only() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let report = commit(&net, [person(&net, "A", 17.0), person(&net, "B", 21.0)]);

    assert_eq!(report.asserted, 2);
    assert_eq!(report.fired, 1);
    assert!(report.is_clean());
    assert_eq!(*printed.lock(), vec!["B".to_string()]);
}

#[test]
fn rule_without_condition_matches_every_fact() {
    let net = network();
    let printed = capture(&net);
    let rule = RuleDefinition::new("everyone", vec![TypedVariable::new("p", "Person")])
        .with_action(Job::new("print", vec![Expr::field("p", "id")]));
    net.add_rule(&rule).unwrap();

    commit(&net, [person(&net, "A", 1.0), person(&net, "B", 2.0)]);

    let mut lines = printed.lock().clone();
    lines.sort();
    assert_eq!(lines, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn rule_added_late_sees_stored_facts() {
    let net = network();
    let printed = capture(&net);
    commit(&net, [person(&net, "A", 30.0), person(&net, "B", 5.0)]);

    let report = net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    assert_eq!(report.fired, 1);
    assert_eq!(*printed.lock(), vec!["A".to_string()]);
    assert_eq!(net.activations().len(), 1);
}

#[test]
fn identical_conditions_share_alpha_nodes() {
    let net = network();
    net.add_rule(&adult_rule("first", 18.0)).unwrap();
    let before = net.node_count();

    net.add_rule(&adult_rule("second", 18.0)).unwrap();

    // Only the terminal node is new.
    assert_eq!(net.node_count(), before + 1);
    assert!(net.lifecycle_stats().shared_nodes >= 1);
    assert_eq!(net.lifecycle_stats().rules, 2);
}

#[test]
fn different_conditions_get_their_own_nodes() {
    let net = network();
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    let before = net.node_count();

    net.add_rule(&adult_rule("senior", 65.0)).unwrap();

    assert_eq!(net.node_count(), before + 2);
}

// =============================================================================
// Rejected rules
// =============================================================================

#[test]
fn duplicate_rule_id_is_rejected() {
    let net = network();
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let err = net.add_rule(&adult_rule("adult", 21.0)).unwrap_err();

    assert!(matches!(err.kind, ErrorKind::DuplicateRule(ref id) if id == "adult"));
    assert_eq!(net.rule_ids().len(), 1);
}

#[test]
fn rule_over_undeclared_type_is_rejected() {
    let net = network();
    let rule = RuleDefinition::new("ghosts", vec![TypedVariable::new("g", "Ghost")]);

    let err = net.add_rule(&rule).unwrap_err();

    assert!(matches!(err.kind, ErrorKind::UnknownType(ref name) if name == "Ghost"));
    assert_eq!(err.context.as_ref().and_then(|c| c.rule.as_deref()), Some("ghosts"));
}

#[test]
fn rule_without_variables_is_rejected() {
    let net = network();
    let err = net.add_rule(&RuleDefinition::new("empty", vec![])).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MalformedAst(_)));
}

#[test]
fn action_naming_undeclared_variable_is_rejected() {
    let net = network();
    let rule = RuleDefinition::new("typo", vec![TypedVariable::new("p", "Person")])
        .with_action(Job::new("print", vec![Expr::field("q", "id")]));

    let err = net.add_rule(&rule).unwrap_err();

    assert!(matches!(err.kind, ErrorKind::UnboundVariable { .. }));
    assert!(net.rule_ids().is_empty());
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn removed_rule_stops_firing() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    net.remove_rule("adult").unwrap();

    let report = commit(&net, [person(&net, "A", 40.0)]);

    assert_eq!(report.fired, 0);
    assert!(printed.lock().is_empty());
    assert!(net.compiled_rule("adult").is_none());
}

#[test]
fn removal_keeps_nodes_other_rules_use() {
    let net = network();
    let baseline = net.node_count();
    net.add_rule(&adult_rule("first", 18.0)).unwrap();
    net.add_rule(&adult_rule("second", 18.0)).unwrap();
    let shared = net.node_count();

    net.remove_rule("first").unwrap();
    assert_eq!(net.node_count(), shared - 1);
    assert!(!net.nodes_for_rule("second").is_empty());

    net.remove_rule("second").unwrap();
    assert_eq!(net.node_count(), baseline);
    assert_eq!(net.lifecycle_stats().rules, 0);
}

#[test]
fn removing_unknown_rule_fails() {
    let net = network();
    let err = net.remove_rule("nope").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RuleNotFound(ref id) if id == "nope"));
}

#[test]
fn referenced_nodes_cannot_be_removed() {
    let net = network();
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    let node = net.nodes_for_rule("adult")[0];

    assert!(!net.can_remove_node(node));
    let err = net.remove_node(node).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NodeInUse { .. }));
    assert!(net.node(node).is_some());
}

#[test]
fn removed_rule_releases_its_activations() {
    let net = network();
    capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    commit(&net, [person(&net, "A", 40.0)]);
    assert_eq!(net.activations().len(), 1);

    net.remove_rule("adult").unwrap();

    assert!(net.activations().is_empty());
    assert!(net.terminal_tokens("adult").is_empty());
}

// =============================================================================
// Reset and programs
// =============================================================================

#[test]
fn reset_clears_rules_types_and_facts() {
    let net = network();
    capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    commit(&net, [person(&net, "A", 40.0)]);

    net.reset().unwrap();

    let summary = net.summary();
    assert_eq!(summary.rules, 0);
    assert_eq!(summary.facts, 0);
    assert_eq!(summary.type_nodes, 0);
    assert!(net.type_definition("Person").is_none());
}

#[test]
fn program_removals_apply_before_rules() {
    let net = network();
    let printed = capture(&net);
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();

    let json = r#"{
        "types": [{"name": "Person", "fields": [
            {"name": "id", "type": "string", "isPrimaryKey": true},
            {"name": "age", "type": "number"}]}],
        "ruleRemovals": [{"ruleID": "adult"}, {"ruleID": "never_loaded"}],
        "expressions": [{
            "ruleId": "minor",
            "set": {"variables": [{"name": "p", "dataType": "Person"}]},
            "constraints": {"type": "comparison", "operator": "<",
                "left": {"type": "fieldAccess", "object": "p", "field": "age"},
                "right": {"type": "number", "value": 18}},
            "action": {"job": {"name": "print", "args": [
                {"type": "fieldAccess", "object": "p", "field": "id"}]}}
        }],
        "facts": [
            {"typeName": "Person", "fields": {"id": "K", "age": 9}},
            {"typeName": "Person", "fields": {"id": "G", "age": 50}}
        ]
    }"#;
    let report = net.load_program_json(json).unwrap();

    assert_eq!(report.fired, 1);
    assert_eq!(*printed.lock(), vec!["K".to_string()]);
    let ids: Vec<String> = net.rule_ids().iter().map(ToString::to_string).collect();
    assert_eq!(ids, vec!["minor".to_string()]);
}

#[test]
fn malformed_program_is_rejected() {
    let net = network();
    let err = net.load_program_json("{\"types\": [").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MalformedAst(_)));
}

#[test]
fn condition_display_survives_compilation() {
    let net = network();
    net.add_rule(&adult_rule("adult", 18.0)).unwrap();
    let rule = net.compiled_rule("adult").unwrap();
    let alpha = rule.alpha.get("p").unwrap();
    assert_eq!(alpha.len(), 1);
    assert!(rule.join_conditions.is_empty());
    assert_eq!(
        Expr::binary(BinaryOp::Ge, Expr::field("p", "age"), Expr::Number(18.0)).to_string(),
        "(p.age >= 18)"
    );
}
