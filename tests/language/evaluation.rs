//! Integration tests for the expression evaluator

use std::sync::Arc;

use trellis_foundation::{BindingChain, ErrorKind, Fact, FactId, Value};
use trellis_language::functions::call;
use trellis_language::{
    BinaryOp, CastType, ConditionBuilder, EvalMode, Evaluator, Expr, FactSource, Function, Locals,
    LogicalOp, PatternCache, arithmetic, cast,
};

fn bindings() -> BindingChain {
    let user = Arc::new(
        Fact::new(FactId::new("User~alice"), "User")
            .with_field("id", "alice")
            .with_field("name", "Alice"),
    );
    let login = Arc::new(
        Fact::new(FactId::new("Login~a@x"), "Login")
            .with_field("email", "a@x")
            .with_field("user", Value::FactRef(FactId::new("User~alice"))),
    );
    BindingChain::single("u", user).add("l", login)
}

struct Sensors(Vec<Arc<Fact>>);

impl FactSource for Sensors {
    fn facts_of_type(&self, type_name: &str) -> Vec<Arc<Fact>> {
        self.0.iter().filter(|f| f.type_name() == type_name).cloned().collect()
    }
}

// =============================================================================
// Comparisons and identity
// =============================================================================

#[test]
fn fact_reference_equals_bound_fact() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let eval = Evaluator::new(&chain, &patterns);
    let cond = Expr::binary(BinaryOp::Eq, Expr::field("l", "user"), Expr::var("u"));
    assert!(eval.condition(&cond).unwrap());
}

#[test]
fn like_and_matches() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let eval = Evaluator::new(&chain, &patterns);
    let like = Expr::binary(BinaryOp::Like, Expr::field("u", "name"), Expr::string("Al%"));
    let matches = Expr::binary(BinaryOp::Matches, Expr::field("l", "email"), Expr::string("^[a-z]+@x$"));
    assert!(eval.condition(&like).unwrap());
    assert!(eval.condition(&matches).unwrap());
    assert!(!patterns.is_empty());
}

#[test]
fn builder_conditions() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let eval = Evaluator::new(&chain, &patterns);
    let u = ConditionBuilder::new("u");
    let cond = ConditionBuilder::all([
        u.field_equals("name", Expr::string("Alice")),
        u.field_in("id", [Expr::string("alice"), Expr::string("bob")]),
    ]);
    assert!(eval.condition(&cond).unwrap());
    assert!(!eval.condition(&ConditionBuilder::not(cond)).unwrap());
}

// =============================================================================
// Unbound variables
// =============================================================================

#[test]
fn strict_mode_rejects_unbound_variables() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let cond = Expr::binary(BinaryOp::Eq, Expr::field("q", "x"), Expr::Number(1.0));
    let err = Evaluator::new(&chain, &patterns).condition(&cond).unwrap_err();
    assert!(err.is_unbound_variable());
}

#[test]
fn partial_mode_treats_unbound_as_unknown() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let eval = Evaluator::new(&chain, &patterns).with_mode(EvalMode::PartialForJoinPlanning);
    let unknown = Expr::binary(BinaryOp::Eq, Expr::field("q", "x"), Expr::Number(1.0));
    assert_eq!(eval.partial_condition(&unknown).unwrap(), None);

    // A false conjunct decides the whole conjunction.
    let decided = Expr::logical(LogicalOp::And, Expr::Bool(false), unknown);
    assert_eq!(eval.partial_condition(&decided).unwrap(), Some(false));
}

// =============================================================================
// Arithmetic, locals, casts, EXISTS
// =============================================================================

#[test]
fn arithmetic_rules() {
    assert_eq!(
        arithmetic(BinaryOp::Add, &Value::Number(1.0), &Value::Number(2.0)).unwrap(),
        Value::Number(3.0)
    );
    assert_eq!(
        arithmetic(BinaryOp::Add, &Value::from("a"), &Value::from("b")).unwrap(),
        Value::from("ab")
    );
    assert!(matches!(
        arithmetic(BinaryOp::Add, &Value::from("a"), &Value::Number(1.0)).unwrap_err().kind,
        ErrorKind::TypeMismatch { .. }
    ));
    assert!(matches!(
        arithmetic(BinaryOp::Div, &Value::Number(1.0), &Value::Number(0.0)).unwrap_err().kind,
        ErrorKind::DivisionByZero
    ));
    assert_eq!(
        arithmetic(BinaryOp::Mod, &Value::Number(7.9), &Value::Number(3.0)).unwrap(),
        Value::Number(1.0)
    );
}

#[test]
fn locals_shadow_the_binding_chain() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let mut locals = Locals::new();
    locals.insert(Arc::from("temp_1"), Value::Number(42.0));
    let eval = Evaluator::new(&chain, &patterns).with_locals(&locals);
    let cond = Expr::binary(BinaryOp::Gt, Expr::var("temp_1"), Expr::Number(40.0));
    assert!(eval.condition(&cond).unwrap());
}

#[test]
fn casts() {
    assert_eq!(cast(&Value::from("12.5"), CastType::Number).unwrap(), Value::Number(12.5));
    assert_eq!(cast(&Value::Number(3.0), CastType::String).unwrap(), Value::from("3"));
    assert_eq!(cast(&Value::Number(0.0), CastType::Bool).unwrap(), Value::Bool(false));
    assert!(cast(&Value::from("abc"), CastType::Number).is_err());
}

#[test]
fn exists_consults_the_fact_source() {
    let chain = bindings();
    let patterns = PatternCache::default();
    let sensors = Sensors(vec![
        Arc::new(Fact::new(FactId::new("Sensor~S1"), "Sensor").with_field("temp", 45.0)),
        Arc::new(Fact::new(FactId::new("Sensor~S2"), "Sensor").with_field("temp", 20.0)),
    ]);
    let eval = Evaluator::new(&chain, &patterns).with_facts(&sensors);
    let hot = |limit: f64| Expr::Exists {
        variable: Arc::from("s"),
        type_name: Arc::from("Sensor"),
        condition: Box::new(Expr::binary(BinaryOp::Gt, Expr::field("s", "temp"), Expr::Number(limit))),
    };
    assert!(eval.condition(&hot(40.0)).unwrap());
    assert!(!eval.condition(&hot(50.0)).unwrap());
}

// =============================================================================
// Functions
// =============================================================================

#[test]
fn length_counts_characters() {
    assert_eq!(call(Function::Length, &[Value::from("héllo")]).unwrap(), Value::Number(5.0));
}

#[test]
fn substring_edges() {
    let s = Value::from("temperature");
    assert_eq!(
        call(Function::Substring, &[s.clone(), Value::Number(0.0), Value::Number(4.0)]).unwrap(),
        Value::from("temp")
    );
    assert_eq!(call(Function::Substring, &[s.clone(), Value::Number(-1.0)]).unwrap(), Value::from(""));
    assert_eq!(call(Function::Substring, &[s.clone(), Value::Number(40.0)]).unwrap(), Value::from(""));
    assert!(matches!(
        call(Function::Substring, &[s]).unwrap_err().kind,
        ErrorKind::ArityMismatch { .. }
    ));
}
