//! Integration tests for JSON program ingest

use trellis_foundation::{ErrorKind, FieldType, Value};
use trellis_language::{BinaryOp, Expr, decode_operator, parse_program};

const PROGRAM: &str = r#"{
    "types": [
        {"name": "Sensor", "fields": [
            {"name": "id", "type": "string", "isPrimaryKey": true},
            {"name": "temp", "type": "number"},
            {"name": "active", "type": "boolean"}]},
        {"name": "Alert", "fields": [
            {"name": "sensor", "type": "Sensor"},
            {"name": "level", "type": "string"}]}
    ],
    "expressions": [{
        "ruleId": "overheat",
        "set": {"variables": [{"name": "s", "dataType": "Sensor"}]},
        "constraints": [
            {"type": "comparison", "operator": "Pg==",
             "left": {"type": "fieldAccess", "object": "s", "field": "temp"},
             "right": {"type": "number", "value": 40}},
            {"type": "comparison", "operator": "==",
             "left": {"type": "fieldAccess", "object": "s", "field": "active"},
             "right": {"type": "booleanLiteral", "value": true}}
        ],
        "action": {"jobs": [{"name": "Xuple", "args": [
            {"type": "string", "value": "alerts"},
            {"type": "inlineFact", "typeName": "Alert", "fields": {
                "sensor": {"type": "variable", "name": "s"},
                "level": {"type": "string", "value": "HIGH"}}}]}]}
    }],
    "facts": [
        {"typeName": "Sensor", "fields": {"id": "S1", "temp": 45, "active": true}}
    ]
}"#;

#[test]
fn program_sections() {
    let program = parse_program(PROGRAM).unwrap();
    assert_eq!(program.types.len(), 2);
    assert_eq!(program.types[1].field("sensor").unwrap().ty, FieldType::parse("Sensor"));
    assert!(program.types[0].is_primary_key("id"));

    let rule = &program.rules[0];
    assert_eq!(&*rule.id, "overheat");
    assert_eq!(rule.variable_type("s"), Some("Sensor"));
    assert_eq!(
        rule.condition.as_ref().unwrap().to_string(),
        "((s.temp > 40) AND (s.active == true))"
    );
    assert_eq!(&*rule.actions[0].name, "Xuple");
    assert!(matches!(rule.actions[0].args[1], Expr::InlineFact { .. }));

    let fact = &program.facts[0];
    assert_eq!(&*fact.type_name, "Sensor");
    assert!(fact.fields.iter().any(|(n, v)| &**n == "temp" && *v == Value::Number(45.0)));
    assert!(program.rule_removals.is_empty());
    assert!(!program.reset);
}

#[test]
fn base64_operators_decode() {
    assert_eq!(decode_operator("Pj0="), ">=");
    assert_eq!(decode_operator("=="), "==");
    assert_eq!(BinaryOp::parse("PD0=").unwrap(), BinaryOp::Le);
}

#[test]
fn malformed_programs() {
    assert!(matches!(parse_program("[]").unwrap_err().kind, ErrorKind::MalformedAst(_)));
    let missing_name = r#"{"types": [{"fields": []}]}"#;
    assert!(matches!(
        parse_program(missing_name).unwrap_err().kind,
        ErrorKind::MalformedAst(_)
    ));
    let bad_op = r#"{"expressions": [{"ruleId": "r",
        "constraints": {"type": "comparison", "operator": "^", "left": 1, "right": 2}}]}"#;
    assert!(matches!(
        parse_program(bad_op).unwrap_err().kind,
        ErrorKind::UnsupportedOperator(_)
    ));
}
