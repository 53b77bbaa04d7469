//! Rule actions.
//!
//! A fired rule runs its action list job by job. Each job names a handler in
//! the [`ActionRegistry`]; its arguments are evaluated against the firing
//! token (see [`executor`]) and handed to the handler together with an
//! [`ExecutionContext`]. Handlers never touch the network directly: fact
//! changes are queued as [`Effect`]s and applied by the network after the job
//! returns, so a failing job keeps the effects of the jobs before it.
//!
//! Effects visible outside the engine (`print` lines, `Xuple` callbacks, and
//! whatever a custom handler hands to [`ExecutionContext::defer`]) are held
//! until the commit that fired them succeeds. A rolled-back commit drops them.

pub mod builtin;
pub mod executor;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use trellis_foundation::{Fact, FactId, FactIdGenerator, Result, TypeRegistry, Value};
use trellis_language::PatternCache;
use trellis_storage::Storage;

use crate::token::Token;

pub use builtin::{InsertAction, LogAction, PrintAction, RetractAction, UpdateAction, XupleAction};
pub use executor::{build_fact, evaluate_argument};

/// Receives the display form of each `print` argument.
pub type PrintSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives `Xuple(space, fact)` emissions with the facts of the firing token.
pub type XupleHandler = Arc<dyn Fn(&str, &Arc<Fact>, &[Arc<Fact>]) -> Result<()> + Send + Sync>;

/// An external side effect held back until its commit succeeds.
pub type Deferred = Box<dyn FnOnce() -> Result<()>>;

/// A named side effect callable from rule actions.
///
/// `execute` runs inside the commit, before the commit is known to succeed.
/// Handlers that talk to the outside world should do so through
/// [`ExecutionContext::defer`].
pub trait ActionHandler: Send + Sync {
    /// Name used in action lists.
    fn name(&self) -> &str;

    /// Runs the action with evaluated arguments.
    ///
    /// # Errors
    ///
    /// An error aborts the remaining jobs of the action list.
    fn execute(&self, args: &[Value], ctx: &mut ExecutionContext<'_>) -> Result<()>;
}

// =============================================================================
// Registry
// =============================================================================

/// Name-to-handler map shared by every rule of a network.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `print`, `log`, `Insert`, `Retract` and `Update`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PrintAction));
        registry.register(Arc::new(LogAction));
        registry.register(Arc::new(InsertAction));
        registry.register(Arc::new(RetractAction));
        registry.register(Arc::new(UpdateAction));
        registry
    }

    /// Registers a handler under its name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().insert(handler.name().to_string(), handler);
    }

    /// Removes a handler.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().get(name).cloned()
    }

    /// Returns true if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// =============================================================================
// Effects
// =============================================================================

/// A fact change requested by an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Assert a new fact, logically supported by the firing token.
    Insert(Arc<Fact>),
    /// Retract a fact.
    Retract(FactId),
    /// Replace a fact. `previous` names the original when the identity changed.
    Update {
        /// Identity of the fact being replaced, if it differs from `fact`'s.
        previous: Option<FactId>,
        /// The new version.
        fact: Arc<Fact>,
    },
}

// =============================================================================
// Execution Context
// =============================================================================

/// Network services an action may use.
#[derive(Clone, Copy)]
pub struct ActionServices<'a> {
    /// Fact store, for lookups and `EXISTS`.
    pub storage: &'a dyn Storage,
    /// Declared types.
    pub types: &'a TypeRegistry,
    /// Identity allocator.
    pub fact_ids: &'a FactIdGenerator,
    /// Compiled LIKE/MATCHES patterns.
    pub patterns: &'a PatternCache,
    /// Destination of `print`.
    pub print: &'a PrintSink,
}

/// What a handler sees while its job runs.
pub struct ExecutionContext<'a> {
    rule: &'a str,
    token: &'a Token,
    services: ActionServices<'a>,
    effects: Vec<Effect>,
    deferred: Vec<Deferred>,
    origins: HashMap<FactId, FactId>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context for one firing of `rule`.
    #[must_use]
    pub fn new(rule: &'a str, token: &'a Token, services: ActionServices<'a>) -> Self {
        Self {
            rule,
            token,
            services,
            effects: Vec::new(),
            deferred: Vec::new(),
            origins: HashMap::new(),
        }
    }

    /// The firing rule.
    #[must_use]
    pub const fn rule(&self) -> &str {
        self.rule
    }

    /// The firing token.
    #[must_use]
    pub const fn token(&self) -> &Token {
        self.token
    }

    /// Network services.
    #[must_use]
    pub const fn services(&self) -> ActionServices<'a> {
        self.services
    }

    /// Facts bound by the firing token, in binding order.
    #[must_use]
    pub fn triggering_facts(&self) -> &[Arc<Fact>] {
        &self.token.facts
    }

    /// Looks up a rule variable; the newest binding of a name wins.
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<&Arc<Fact>> {
        self.token.bindings.get(name)
    }

    /// Reads a fact from the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be read.
    pub fn fact(&self, id: &FactId) -> Result<Option<Arc<Fact>>> {
        Ok(self.services.storage.get(id)?)
    }

    /// Queues one line for the print sink. It is written once the commit succeeds.
    pub fn print(&mut self, line: &str) {
        let sink = Arc::clone(self.services.print);
        let line = line.to_string();
        self.defer(move || {
            sink(&line);
            Ok(())
        });
    }

    /// Schedules an external side effect for after the commit succeeds.
    ///
    /// An error returned by `call` is reported in the commit report; it cannot
    /// undo the commit.
    pub fn defer(&mut self, call: impl FnOnce() -> Result<()> + 'static) {
        self.deferred.push(Box::new(call));
    }

    /// Number of deferred side effects queued so far.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Drains the deferred side effects.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    /// Queues the assertion of a new fact.
    pub fn insert(&mut self, fact: Arc<Fact>) {
        self.effects.push(Effect::Insert(fact));
    }

    /// Queues a retraction.
    pub fn retract(&mut self, id: FactId) {
        self.effects.push(Effect::Retract(id));
    }

    /// Queues a replacement, retracting the original if the identity changed.
    pub fn update(&mut self, fact: Arc<Fact>) {
        let previous = self
            .origin_of(fact.id())
            .filter(|origin| *origin != fact.id())
            .cloned();
        self.effects.push(Effect::Update { previous, fact });
    }

    /// Identity of the bound fact a modified fact was derived from.
    #[must_use]
    pub fn origin_of(&self, id: &FactId) -> Option<&FactId> {
        self.origins.get(id)
    }

    pub(crate) fn record_origin(&mut self, derived: FactId, original: FactId) {
        self.origins.insert(derived, original);
    }

    /// Effects queued so far.
    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Drains the queued effects.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}
