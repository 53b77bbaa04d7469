//! Built-in action handlers.

use std::sync::Arc;

use tracing::info;
use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result, Value};

use super::{ActionHandler, ExecutionContext, XupleHandler};

fn arity(action: &str, expected: &str, args: &[Value]) -> Error {
    Error::new(ErrorKind::ArityMismatch {
        function: action.to_string(),
        expected: expected.to_string(),
        actual: args.len(),
    })
}

fn single_fact<'v>(action: &str, args: &'v [Value]) -> Result<&'v Arc<Fact>> {
    match args {
        [Value::Fact(fact)] => Ok(fact),
        [other] => Err(Error::type_mismatch("fact", other.kind_name())),
        _ => Err(arity(action, "1", args)),
    }
}

/// `print(args...)`: each argument's display form goes to the print sink
/// once the commit succeeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrintAction;

impl ActionHandler for PrintAction {
    fn name(&self) -> &str {
        "print"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for arg in args {
            ctx.print(&arg.to_string());
        }
        Ok(())
    }
}

/// `log(args...)`: arguments joined by spaces, emitted at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAction;

impl ActionHandler for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let message = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        info!(rule = ctx.rule(), "{message}");
        Ok(())
    }
}

/// `Insert(fact)`: asserts a new fact supported by the firing token.
///
/// Retracting the token later retracts the inserted fact too.
#[derive(Clone, Copy, Debug, Default)]
pub struct InsertAction;

impl ActionHandler for InsertAction {
    fn name(&self) -> &str {
        "Insert"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let fact = single_fact(self.name(), args)?;
        if ctx.fact(fact.id())?.is_some() {
            return Err(Error::fact_validation(
                fact.type_name(),
                format!("fact {} already exists", fact.id()),
            ));
        }
        ctx.insert(Arc::clone(fact));
        Ok(())
    }
}

/// `Retract(fact | id)`: retracts a fact.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetractAction;

impl ActionHandler for RetractAction {
    fn name(&self) -> &str {
        "Retract"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let id = match args {
            [Value::Fact(fact)] => fact.id().clone(),
            [Value::FactRef(id)] => id.clone(),
            [Value::String(id)] => FactId::new(id),
            [other] => return Err(Error::type_mismatch("fact or identity", other.kind_name())),
            _ => return Err(arity(self.name(), "1", args)),
        };
        ctx.retract(id);
        Ok(())
    }
}

/// `Update(fact)`: replaces the stored version of a fact.
///
/// The argument is normally a modified copy of a bound fact. An unchanged
/// fact is a no-op; a copy whose primary key changed retracts the original.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateAction;

impl ActionHandler for UpdateAction {
    fn name(&self) -> &str {
        "Update"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let fact = single_fact(self.name(), args)?;
        let rekeyed = ctx.origin_of(fact.id()).is_some_and(|origin| origin != fact.id());
        if !rekeyed {
            if let Some(current) = ctx.fact(fact.id())? {
                if current.same_fields(fact) {
                    return Ok(());
                }
            }
        }
        ctx.update(Arc::clone(fact));
        Ok(())
    }
}

/// `Xuple(space, fact)`: hands a fact to the host's tuple-space callback.
///
/// Arguments are checked when the action runs; the callback itself is called
/// after the commit succeeds.
#[derive(Clone)]
pub struct XupleAction {
    handler: XupleHandler,
}

impl XupleAction {
    /// Wraps a callback.
    #[must_use]
    pub fn new(handler: XupleHandler) -> Self {
        Self { handler }
    }
}

impl std::fmt::Debug for XupleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("XupleAction")
    }
}

impl ActionHandler for XupleAction {
    fn name(&self) -> &str {
        "Xuple"
    }

    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let [space, fact] = args else {
            return Err(arity(self.name(), "2", args));
        };
        let Value::Fact(fact) = fact else {
            return Err(Error::type_mismatch("fact", fact.kind_name()));
        };
        let handler = Arc::clone(&self.handler);
        let space = space.to_string();
        let fact = Arc::clone(fact);
        let triggering = ctx.triggering_facts().to_vec();
        ctx.defer(move || handler(&space, &fact, &triggering));
        Ok(())
    }
}
