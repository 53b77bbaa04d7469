//! Job execution: argument evaluation and fact construction.
//!
//! Most arguments go through the expression evaluator. Four shapes only make
//! sense in actions and are built here instead:
//! - `FactCreation` and `InlineFact` build a validated fact of a declared type
//! - `FactModification` copies a bound fact with one field replaced; replacing
//!   a primary-key field gives the copy a new identity
//! - `UpdateWithModifications` replaces several fields and keeps the identity

use std::sync::Arc;

use tracing::warn;
use trellis_foundation::im::OrdMap;
use trellis_foundation::{
    Error, Fact, FactIdGenerator, Result, TypeRegistry, Value, primary_key_identity,
};
use trellis_language::{Evaluator, Expr, FieldInit, Job};

use super::{ActionRegistry, ActionServices, ExecutionContext};
use crate::alpha::StoredFacts;

/// Builds a fact of a declared type from field values.
///
/// Values are coerced to the declared field types, the complete field set is
/// validated, and the identity follows the primary key (or the sequential
/// counter for types without one).
///
/// # Errors
///
/// Returns `UnknownType` for an undeclared type and `FactValidation` for a
/// missing, undeclared, or mistyped field.
pub fn build_fact(
    types: &TypeRegistry,
    fact_ids: &FactIdGenerator,
    type_name: &str,
    fields: Vec<(Arc<str>, Value)>,
) -> Result<Fact> {
    let def = types.get(type_name).ok_or_else(|| Error::unknown_type(type_name))?;
    let mut map: OrdMap<Arc<str>, Value> = OrdMap::new();
    for (name, value) in fields {
        let value = match def.field(&name) {
            Some(field) => field.ty.coerce(value),
            None => value,
        };
        map.insert(name, value);
    }
    def.validate(map.iter().map(|(name, value)| (&**name, value)))?;
    let id = fact_ids.generate(def, |name| map.get(name))?;
    Ok(Fact::from_fields(id, type_name, map))
}

/// Evaluates one action argument against the firing token.
///
/// # Errors
///
/// Returns the evaluation or validation error; the caller aborts the job.
pub fn evaluate_argument(expr: &Expr, ctx: &mut ExecutionContext<'_>) -> Result<Value> {
    match expr {
        Expr::FactCreation { type_name, fields } | Expr::InlineFact { type_name, fields } => {
            let values = evaluate_fields(fields, ctx)?;
            let services = ctx.services();
            let fact = build_fact(services.types, services.fact_ids, type_name, values)?;
            Ok(Value::Fact(Arc::new(fact)))
        }
        Expr::FactModification {
            variable,
            field,
            value,
        } => {
            let original = bound(ctx, variable)?;
            let value = evaluate_argument(value, ctx)?;
            let modified = modify(ctx.services(), &original, vec![(Arc::clone(field), value)], true)?;
            ctx.record_origin(modified.id().clone(), original.id().clone());
            Ok(Value::Fact(Arc::new(modified)))
        }
        Expr::UpdateWithModifications {
            variable,
            modifications,
        } => {
            let original = bound(ctx, variable)?;
            let changes = evaluate_fields(modifications, ctx)?;
            let modified = modify(ctx.services(), &original, changes, false)?;
            if modified.same_fields(&original) {
                return Ok(Value::Fact(original));
            }
            ctx.record_origin(modified.id().clone(), original.id().clone());
            Ok(Value::Fact(Arc::new(modified)))
        }
        other => {
            let services = ctx.services();
            let token = ctx.token();
            let facts = StoredFacts(services.storage);
            Evaluator::new(&token.bindings, services.patterns)
                .with_locals(&token.locals)
                .with_facts(&facts)
                .evaluate(other)
        }
    }
}

fn evaluate_fields(fields: &[FieldInit], ctx: &mut ExecutionContext<'_>) -> Result<Vec<(Arc<str>, Value)>> {
    let mut values = Vec::with_capacity(fields.len());
    for (name, expr) in fields {
        values.push((Arc::clone(name), evaluate_argument(expr, ctx)?));
    }
    Ok(values)
}

fn bound(ctx: &ExecutionContext<'_>, variable: &str) -> Result<Arc<Fact>> {
    ctx.get_variable(variable).cloned().ok_or_else(|| {
        let available = ctx.token().variables().iter().map(ToString::to_string).collect();
        Error::unbound_variable(variable, available)
    })
}

/// Copies `original` with `changes` applied. With `rekey`, a changed primary
/// key yields a new identity.
fn modify(
    services: ActionServices<'_>,
    original: &Arc<Fact>,
    changes: Vec<(Arc<str>, Value)>,
    rekey: bool,
) -> Result<Fact> {
    let def = services
        .types
        .get(original.type_name())
        .ok_or_else(|| Error::unknown_type(original.type_name()))?;
    let mut fact = (**original).clone();
    let mut key_changed = false;
    for (name, value) in changes {
        let field = def.field(&name).ok_or_else(|| {
            Error::fact_validation(&*def.name, format!("field '{name}' is not declared"))
        })?;
        let value = field.ty.coerce(value);
        def.validate_field(&name, &value)?;
        key_changed |= field.is_primary_key && original.get(&name) != Some(&value);
        fact = fact.set(&name, value);
    }
    if rekey && key_changed {
        if let Some(id) = primary_key_identity(def, |name| fact.get(name))? {
            fact = fact.with_id(id);
        }
    }
    Ok(fact)
}

/// Runs one job: evaluates its arguments and calls its handler.
///
/// Unknown action names are logged and skipped.
///
/// # Errors
///
/// Returns the first argument or handler error, tagged with the rule.
pub fn run_job(registry: &ActionRegistry, job: &Job, ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let Some(handler) = registry.get(&job.name) else {
        warn!(rule = ctx.rule(), action = &*job.name, "unknown action; skipped");
        return Ok(());
    };
    let run = |ctx: &mut ExecutionContext<'_>| -> Result<()> {
        let mut args = Vec::with_capacity(job.args.len());
        for arg in &job.args {
            args.push(evaluate_argument(arg, ctx)?);
        }
        handler.execute(&args, ctx)
    };
    run(ctx).map_err(|err| {
        if err.context.is_some() {
            err
        } else {
            err.in_rule(ctx.rule())
        }
    })
}
