//! JSON program ingest.
//!
//! The rule parser emits a loosely typed JSON tree. This module turns it into a
//! [`Program`] of closed [`Expr`] values, collapsing node-type aliases and
//! Base64 operator spellings on the way in.
//!
//! # Example
//!
//! ```
//! use trellis_language::ingest::parse_program;
//!
//! let program = parse_program(r#"{
//!     "types": [{"name": "Person", "fields": [
//!         {"name": "id", "type": "string", "isPrimaryKey": true},
//!         {"name": "age", "type": "number"}
//!     ]}],
//!     "expressions": [{
//!         "ruleId": "adult",
//!         "set": {"variables": [{"name": "p", "dataType": "Person"}]},
//!         "constraints": {"type": "comparison", "operator": "Pj0=",
//!             "left": {"type": "fieldAccess", "object": "p", "field": "age"},
//!             "right": {"type": "number", "value": 18}},
//!         "action": {"jobs": [{"name": "print", "args": [
//!             {"type": "fieldAccess", "object": "p", "field": "id"}]}]}
//!     }]
//! }"#).unwrap();
//!
//! assert_eq!(program.rules[0].condition.as_ref().unwrap().to_string(), "(p.age >= 18)");
//! ```

use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::debug;
use trellis_foundation::{Error, FieldDefinition, FieldType, Result, TypeDefinition, Value};

use crate::ast::{Expr, FieldInit};
use crate::operator::{BinaryOp, CastType, Function, LogicalOp};
use crate::program::{FactLiteral, Job, Program, RuleDefinition, TypedVariable};

/// Parses a JSON program.
///
/// # Errors
///
/// Returns [`trellis_foundation::ErrorKind::MalformedAst`] if the text is not
/// JSON or does not describe a program.
pub fn parse_program(json: &str) -> Result<Program> {
    let root: Json =
        serde_json::from_str(json).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;
    program_from_json(&root)
}

/// Converts an already-parsed JSON document into a [`Program`].
///
/// # Errors
///
/// Returns [`trellis_foundation::ErrorKind::MalformedAst`] for structural problems.
pub fn program_from_json(root: &Json) -> Result<Program> {
    let obj = as_object(root, "program")?;
    let mut program = Program::new();

    for ty in array_field(obj, "types") {
        program.types.push(type_from_json(ty)?);
    }
    for rule in array_field(obj, "expressions")
        .iter()
        .chain(array_field(obj, "rules"))
    {
        program.rules.push(rule_from_json(rule)?);
    }
    for fact in array_field(obj, "facts") {
        program.facts.push(fact_from_json(fact)?);
    }
    for removal in array_field(obj, "ruleRemovals") {
        let removal = as_object(removal, "ruleRemoval")?;
        let id = str_field(removal, "ruleID")
            .or_else(|_| str_field(removal, "ruleId"))?;
        program.rule_removals.push(Arc::from(id));
    }
    program.reset = !array_field(obj, "resets").is_empty();

    debug!(
        types = program.types.len(),
        rules = program.rules.len(),
        facts = program.facts.len(),
        "ingested program"
    );
    Ok(program)
}

fn type_from_json(json: &Json) -> Result<TypeDefinition> {
    let obj = as_object(json, "typeDefinition")?;
    let mut def = TypeDefinition::new(str_field(obj, "name")?);
    for field in array_field(obj, "fields") {
        let field = as_object(field, "field")?;
        let name = str_field(field, "name")?;
        let ty = FieldType::parse(str_field(field, "type")?);
        let is_pk = field
            .get("isPrimaryKey")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        def = def.with_field(if is_pk {
            FieldDefinition::primary_key(name, ty)
        } else {
            FieldDefinition::new(name, ty)
        });
    }
    Ok(def)
}

fn rule_from_json(json: &Json) -> Result<RuleDefinition> {
    let obj = as_object(json, "expression")?;
    let id = str_field(obj, "ruleId").or_else(|_| str_field(obj, "ruleID"))?;

    let mut variables = Vec::new();
    let sets: Vec<&Json> = match (obj.get("patterns"), obj.get("set")) {
        (Some(Json::Array(patterns)), _) => patterns.iter().collect(),
        (_, Some(set)) => vec![set],
        _ => Vec::new(),
    };
    for set in sets {
        let set = as_object(set, "set")?;
        for var in array_field(set, "variables") {
            let var = as_object(var, "typedVariable")?;
            variables.push(TypedVariable::new(
                str_field(var, "name")?,
                str_field(var, "dataType")?,
            ));
        }
    }

    let condition = match obj.get("constraints") {
        None | Some(Json::Null) => None,
        Some(Json::Array(items)) if items.is_empty() => None,
        Some(Json::Array(items)) => Some(conjunction(items)?),
        Some(other) => Some(expr_from_json(other)?),
    };

    let mut rule = RuleDefinition::new(id, variables);
    rule.condition = condition;
    if let Some(action) = obj.get("action").filter(|a| !a.is_null()) {
        let action = as_object(action, "action")?;
        let jobs: Vec<&Json> = match (action.get("jobs"), action.get("job")) {
            (Some(Json::Array(jobs)), _) if !jobs.is_empty() => jobs.iter().collect(),
            (_, Some(job)) if !job.is_null() => vec![job],
            _ => Vec::new(),
        };
        for job in jobs {
            rule.actions.push(job_from_json(job)?);
        }
    }
    Ok(rule)
}

fn conjunction(items: &[Json]) -> Result<Expr> {
    let mut iter = items.iter();
    let first = iter
        .next()
        .ok_or_else(|| Error::malformed("empty constraint list"))?;
    let left = expr_from_json(first)?;
    let operations = iter
        .map(|item| Ok((LogicalOp::And, expr_from_json(item)?)))
        .collect::<Result<Vec<_>>>()?;
    if operations.is_empty() {
        return Ok(left);
    }
    Ok(Expr::Logical {
        left: Box::new(left),
        operations,
    })
}

fn job_from_json(json: &Json) -> Result<Job> {
    let obj = as_object(json, "jobCall")?;
    let args = array_field(obj, "args")
        .iter()
        .map(expr_from_json)
        .collect::<Result<Vec<_>>>()?;
    Ok(Job::new(str_field(obj, "name")?, args))
}

fn fact_from_json(json: &Json) -> Result<FactLiteral> {
    let obj = as_object(json, "fact")?;
    let mut fact = FactLiteral::new(str_field(obj, "typeName")?);
    match obj.get("fields") {
        Some(Json::Array(fields)) => {
            for field in fields {
                let field = as_object(field, "factField")?;
                let value = field
                    .get("value")
                    .ok_or_else(|| Error::malformed("fact field without value"))?;
                fact.fields
                    .push((Arc::from(str_field(field, "name")?), literal_value(value)?));
            }
        }
        Some(Json::Object(fields)) => {
            for (name, value) in fields {
                fact.fields.push((Arc::from(name.as_str()), literal_value(value)?));
            }
        }
        _ => {}
    }
    Ok(fact)
}

/// Converts a fact field value into a [`Value`].
///
/// Accepts bare JSON scalars and `{type, value}` wrappers, nested once.
fn literal_value(json: &Json) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Nil),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| Error::malformed(format!("number out of range: {n}"))),
        Json::String(s) => Ok(Value::from(s.as_str())),
        Json::Array(items) => Ok(Value::Array(
            items.iter().map(literal_value).collect::<Result<_>>()?,
        )),
        Json::Object(obj) => match obj.get("value") {
            Some(inner) => literal_value(inner),
            None => Err(Error::malformed("fact value object without 'value'")),
        },
    }
}

/// Converts one JSON expression node into an [`Expr`].
///
/// # Errors
///
/// Returns [`trellis_foundation::ErrorKind::MalformedAst`] for unknown node
/// types or missing keys, and
/// [`trellis_foundation::ErrorKind::UnsupportedOperator`] for unknown operators.
pub fn expr_from_json(json: &Json) -> Result<Expr> {
    let obj = match json {
        Json::Object(obj) => obj,
        Json::Bool(b) => return Ok(Expr::Bool(*b)),
        Json::Number(_) => {
            let Value::Number(n) = literal_value(json)? else {
                return Err(Error::malformed("number literal"));
            };
            return Ok(Expr::Number(n));
        }
        Json::String(s) => return Ok(Expr::string(s)),
        Json::Array(items) => {
            return Ok(Expr::Array(
                items.iter().map(expr_from_json).collect::<Result<_>>()?,
            ));
        }
        Json::Null => return Err(Error::malformed("null expression")),
    };

    let kind = str_field(obj, "type")?;
    match kind {
        "number" | "numberLiteral" => Ok(Expr::Number(
            required(obj, "value")?
                .as_f64()
                .ok_or_else(|| Error::malformed("number literal without numeric value"))?,
        )),
        "string" | "stringLiteral" => Ok(Expr::string(str_field(obj, "value")?)),
        "bool" | "boolean" | "booleanLiteral" => Ok(Expr::Bool(
            required(obj, "value")?
                .as_bool()
                .ok_or_else(|| Error::malformed("bool literal without boolean value"))?,
        )),
        "variable" | "identifier" => Ok(Expr::var(str_field(obj, "name")?)),
        "fieldAccess" => Ok(Expr::field(
            str_field(obj, "object")?,
            str_field(obj, "field")?,
        )),
        "binaryOperation" | "binaryOp" | "binary_operation" | "comparison" => binary(obj),
        "constraint" => match obj.get("constraint") {
            Some(inner) => expr_from_json(inner),
            None => binary(obj),
        },
        "logicalExpr" | "logicalExpression" => {
            let left = expr_from_json(required(obj, "left")?)?;
            let operations = array_field(obj, "operations")
                .iter()
                .map(|op| {
                    let op = as_object(op, "logicalOperation")?;
                    Ok((
                        LogicalOp::parse(str_field(op, "op")?)?,
                        expr_from_json(required(op, "right")?)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Logical {
                left: Box::new(left),
                operations,
            })
        }
        "notConstraint" | "negation" | "not" => {
            let inner = obj
                .get("expression")
                .or_else(|| obj.get("operand"))
                .ok_or_else(|| Error::malformed("negation without operand"))?;
            Ok(Expr::negate(expr_from_json(inner)?))
        }
        "existsConstraint" => {
            let var = as_object(required(obj, "variable")?, "typedVariable")?;
            Ok(Expr::Exists {
                variable: Arc::from(str_field(var, "name")?),
                type_name: Arc::from(str_field(var, "dataType")?),
                condition: Box::new(expr_from_json(required(obj, "condition")?)?),
            })
        }
        "cast" => Ok(Expr::Cast {
            target: CastType::parse(str_field(obj, "castType")?)?,
            inner: Box::new(expr_from_json(required(obj, "expression")?)?),
        }),
        "functionCall" => Ok(Expr::FunctionCall {
            function: Function::parse(str_field(obj, "name")?)?,
            args: array_field(obj, "args")
                .iter()
                .map(expr_from_json)
                .collect::<Result<_>>()?,
        }),
        "arrayLiteral" => Ok(Expr::Array(
            array_field(obj, "elements")
                .iter()
                .map(expr_from_json)
                .collect::<Result<_>>()?,
        )),
        "factCreation" => Ok(Expr::FactCreation {
            type_name: Arc::from(str_field(obj, "typeName")?),
            fields: field_inits(obj.get("fields"))?,
        }),
        "inlineFact" => Ok(Expr::InlineFact {
            type_name: Arc::from(str_field(obj, "typeName")?),
            fields: field_inits(obj.get("fields"))?,
        }),
        "factModification" => Ok(Expr::FactModification {
            variable: Arc::from(str_field(obj, "variable")?),
            field: Arc::from(str_field(obj, "field")?),
            value: Box::new(expr_from_json(required(obj, "value")?)?),
        }),
        "updateWithModifications" => Ok(Expr::UpdateWithModifications {
            variable: Arc::from(str_field(obj, "variable")?),
            modifications: field_inits(obj.get("modifications"))?,
        }),
        other => Err(Error::malformed(format!("unknown expression type '{other}'"))),
    }
}

fn binary(obj: &Map<String, Json>) -> Result<Expr> {
    Ok(Expr::binary(
        BinaryOp::parse(str_field(obj, "operator")?)?,
        expr_from_json(required(obj, "left")?)?,
        expr_from_json(required(obj, "right")?)?,
    ))
}

/// Reads field initializers written either as `{"name": expr}` or as
/// `[{"name": ..., "value": expr}]`.
fn field_inits(json: Option<&Json>) -> Result<Vec<FieldInit>> {
    match json {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(Json::Object(map)) => map
            .iter()
            .map(|(name, value)| Ok((Arc::from(name.as_str()), expr_from_json(value)?)))
            .collect(),
        Some(Json::Array(items)) => items
            .iter()
            .map(|item| {
                let item = as_object(item, "field")?;
                let name = str_field(item, "name").or_else(|_| str_field(item, "field"))?;
                Ok((Arc::from(name), expr_from_json(required(item, "value")?)?))
            })
            .collect(),
        Some(other) => Err(Error::malformed(format!(
            "field initializers must be an object or array, got {other}"
        ))),
    }
}

// =============================================================================
// JSON helpers
// =============================================================================

fn as_object<'a>(json: &'a Json, what: &str) -> Result<&'a Map<String, Json>> {
    json.as_object()
        .ok_or_else(|| Error::malformed(format!("{what} must be an object")))
}

fn required<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<&'a Json> {
    obj.get(key)
        .ok_or_else(|| Error::malformed(format!("missing '{key}'")))
}

fn str_field<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<&'a str> {
    required(obj, key)?
        .as_str()
        .ok_or_else(|| Error::malformed(format!("'{key}' must be a string")))
}

fn array_field<'a>(obj: &'a Map<String, Json>, key: &str) -> &'a [Json] {
    obj.get(key)
        .and_then(Json::as_array)
        .map_or(&[], Vec::as_slice)
}
