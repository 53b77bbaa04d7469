//! The RETE network: node arena, rule wiring, and the public API.
//!
//! Nodes are kept in an arena keyed by [`NodeId`]. Each declared type owns one
//! type node under the root; each rule hangs an alpha path per variable under
//! the type nodes, a left-deep chain of joins across the paths, and a terminal
//! node. Node ids are hashes of structural signatures that include the
//! parent's id, so identical prefixes of different rules resolve to the same
//! physical nodes. The [`LifecycleManager`] counts which rules use each node
//! and decides when one may be destroyed.
//!
//! Everything that changes node memories (commits, rule wiring and replay,
//! rule removal, reset) serializes on one commit lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use trellis_foundation::{
    Error, ErrorKind, Fact, FactId, FactIdGenerator, Result, TypeDefinition, TypeRegistry, Value,
};
use trellis_language::{PatternCache, Program, RuleDefinition, parse_program};
use trellis_storage::Storage;

use crate::action::{self, ActionHandler, ActionRegistry, PrintSink, XupleAction};
use crate::alpha::{AlphaNode, AlphaTest};
use crate::beta::{BetaPlan, plan_joins};
use crate::cache::{ArithmeticResultCache, ResultCacheStats};
use crate::compiler::{AlphaCondition, CompiledRule, compile_rule};
use crate::config::EngineConfig;
use crate::exists::ExistsNode;
use crate::join::{JoinNode, JoinType};
use crate::lifecycle::{LifecycleManager, LifecycleStats};
use crate::metrics::{DecompositionMetrics, MetricsSummary};
use crate::node::{Edge, Node, NodeId, NodeKind, Side};
use crate::propagate::{ActivationRecord, Compensation, Propagation, SupportMap};
use crate::signature_cache::SignatureCache;
use crate::token::{Token, TokenIds};
use crate::transaction::{CommitReport, Transaction, TransactionOptions};

const ROOT_SIGNATURE: &str = "root";

/// Receives a [`Compensation`] whenever an activation goes out of force.
pub type RetractionHandler = Arc<dyn Fn(&Compensation) + Send + Sync>;

#[derive(Debug, Default)]
struct Graph {
    nodes: HashMap<NodeId, Arc<Node>>,
    type_nodes: HashMap<Arc<str>, NodeId>,
}

impl Graph {
    fn with_root() -> (Self, NodeId) {
        let root = Node::new(ROOT_SIGNATURE.to_string(), NodeKind::Root);
        let id = root.id;
        let mut graph = Self::default();
        graph.nodes.insert(id, Arc::new(root));
        (graph, id)
    }
}

/// Nodes and edges a rule asked for while being wired.
#[derive(Debug, Default)]
struct Wiring {
    created: Vec<NodeId>,
    used: Vec<NodeId>,
    new_edges: Vec<(NodeId, Edge)>,
}

// =============================================================================
// Network
// =============================================================================

/// A RETE network over a pluggable fact store.
///
/// ```
/// use trellis_engine::Network;
/// use trellis_storage::MemoryStorage;
///
/// let program = r#"{
///   "types": [{"name": "Person", "fields": [
///     {"name": "name", "type": "string", "isPrimaryKey": true},
///     {"name": "age", "type": "number"}]}],
///   "facts": [{"typeName": "Person", "fields": {"name": "B", "age": 20}}]
/// }"#;
/// let network = Network::new(MemoryStorage::new());
/// let report = network.load_program_json(program).unwrap();
/// assert_eq!(report.asserted, 1);
/// ```
pub struct Network {
    pub(crate) config: EngineConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) types: RwLock<TypeRegistry>,
    pub(crate) fact_ids: FactIdGenerator,
    pub(crate) token_ids: TokenIds,
    pub(crate) patterns: PatternCache,
    pub(crate) results: ArithmeticResultCache,
    pub(crate) metrics: DecompositionMetrics,
    pub(crate) lifecycle: RwLock<LifecycleManager>,
    pub(crate) actions: ActionRegistry,
    pub(crate) support: Mutex<SupportMap>,
    pub(crate) print_sink: RwLock<PrintSink>,
    pub(crate) retraction_handler: RwLock<Option<RetractionHandler>>,
    pub(crate) commit_lock: Mutex<()>,
    graph: RwLock<Graph>,
    root: RwLock<NodeId>,
    rules: RwLock<BTreeMap<Arc<str>, Arc<CompiledRule>>>,
    hash_cache: SignatureCache<String, NodeId>,
    prefix_cache: SignatureCache<String, NodeId>,
    connection_cache: SignatureCache<(NodeId, Edge), ()>,
    shut_down: AtomicBool,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("rules", &self.rules.read().len())
            .field("nodes", &self.node_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Network {
    /// Creates a network with the default configuration.
    #[must_use]
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self::build(Arc::new(storage), EngineConfig::default())
    }

    /// Creates a network with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if the configuration is rejected.
    pub fn with_config(storage: impl Storage + 'static, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(Arc::new(storage), config))
    }

    fn build(storage: Arc<dyn Storage>, config: EngineConfig) -> Self {
        let (graph, root) = Graph::with_root();
        let mut metrics = config.metrics.clone();
        metrics.enabled &= config.chain.metrics_enabled;
        let print: PrintSink = Arc::new(|line: &str| println!("{line}"));
        Self {
            storage,
            types: RwLock::new(TypeRegistry::new()),
            fact_ids: FactIdGenerator::new(),
            token_ids: TokenIds::default(),
            patterns: PatternCache::default(),
            results: ArithmeticResultCache::new(&config.arithmetic_cache),
            metrics: DecompositionMetrics::new(metrics),
            lifecycle: RwLock::new(LifecycleManager::new()),
            actions: ActionRegistry::with_builtins(),
            support: Mutex::new(SupportMap::new()),
            print_sink: RwLock::new(print),
            retraction_handler: RwLock::new(None),
            commit_lock: Mutex::new(()),
            graph: RwLock::new(graph),
            root: RwLock::new(root),
            rules: RwLock::new(BTreeMap::new()),
            hash_cache: SignatureCache::new(config.chain.hash_cache.clone()),
            prefix_cache: SignatureCache::new(config.chain.beta_hash_cache.clone()),
            connection_cache: SignatureCache::new(config.chain.connection_cache.clone()),
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    /// The configuration in force.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(Error::new(ErrorKind::NetworkShutdown))
        } else {
            Ok(())
        }
    }

    /// Stops accepting work. Later loads, rule changes, and commits fail with
    /// `NetworkShutdown`.
    pub fn shutdown(&self) {
        let _commit = self.commit_lock.lock();
        self.shut_down.store(true, Ordering::Release);
        info!("network shut down");
    }

    /// Returns true after [`Network::shutdown`].
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // =========================================================================
    // Programs
    // =========================================================================

    /// Loads a program: reset, types, rule removals, rules, then the facts in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// Returns the first type, rule, or commit error. Sections applied before
    /// the failure stay applied.
    pub fn load_program(&self, program: &Program) -> Result<CommitReport> {
        self.ensure_running()?;
        if program.reset {
            self.reset()?;
        }
        for def in &program.types {
            self.register_type(def.clone())?;
        }
        for id in &program.rule_removals {
            if let Err(err) = self.remove_rule(id) {
                if matches!(err.kind, ErrorKind::RuleNotFound(_)) {
                    warn!(rule = %id, "removal of unknown rule ignored");
                } else {
                    return Err(err);
                }
            }
        }
        let mut report = CommitReport::default();
        for rule in &program.rules {
            report.merge(self.add_rule(rule)?);
        }
        if !program.facts.is_empty() {
            let mut tx = self.begin_transaction();
            for literal in &program.facts {
                tx.submit(self.build_fact(&literal.type_name, literal.fields.clone())?)?;
            }
            report.merge(tx.commit()?);
        }
        info!(
            types = program.types.len(),
            rules = program.rules.len(),
            facts = program.facts.len(),
            fired = report.fired,
            "program loaded"
        );
        Ok(report)
    }

    /// Parses a JSON program and loads it.
    ///
    /// # Errors
    ///
    /// Returns the parse error or any [`Network::load_program`] error.
    pub fn load_program_json(&self, json: &str) -> Result<CommitReport> {
        let program = parse_program(json)?;
        self.load_program(&program)
    }

    /// Removes every rule, node, type, fact, and cached result.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be cleared.
    pub fn reset(&self) -> Result<()> {
        self.ensure_running()?;
        let _commit = self.commit_lock.lock();
        self.rules.write().clear();
        self.lifecycle.write().clear();
        let (graph, root) = Graph::with_root();
        *self.graph.write() = graph;
        *self.root.write() = root;
        *self.types.write() = TypeRegistry::new();
        self.storage.clear()?;
        self.hash_cache.clear();
        self.prefix_cache.clear();
        self.connection_cache.clear();
        self.results.clear();
        self.support.lock().clear();
        self.metrics.reset();
        info!("network reset");
        Ok(())
    }

    // =========================================================================
    // Types and facts
    // =========================================================================

    /// Declares a fact type, creating its type node on first declaration.
    ///
    /// Facts of the type already in the store are loaded into the new node.
    ///
    /// # Errors
    ///
    /// Returns a storage error if existing facts cannot be read.
    pub fn register_type(&self, def: TypeDefinition) -> Result<Arc<TypeDefinition>> {
        self.ensure_running()?;
        let _commit = self.commit_lock.lock();
        let name = Arc::clone(&def.name);
        let existing = self.storage.facts_of_type(&name)?;
        let def = self.types.write().register(def);
        let mut graph = self.graph.write();
        if !graph.type_nodes.contains_key(&name) {
            let node = Node::new(
                format!("type:{name}"),
                NodeKind::Type {
                    type_name: Arc::clone(&name),
                },
            );
            {
                let mut memory = node.memory_mut();
                for fact in existing {
                    memory.add_fact(fact);
                }
            }
            let id = node.id;
            graph.nodes.insert(id, Arc::new(node));
            graph.type_nodes.insert(Arc::clone(&name), id);
            let root = *self.root.read();
            if let Some(root) = graph.nodes.get(&root) {
                root.connect(Edge {
                    target: id,
                    side: Side::Left,
                    variable: None,
                });
            }
            debug!(type_name = %name, node = %id, "type node created");
        }
        Ok(def)
    }

    /// Returns a declared type.
    #[must_use]
    pub fn type_definition(&self, name: &str) -> Option<Arc<TypeDefinition>> {
        self.types.read().get(name).cloned()
    }

    /// Names of the declared types.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().names().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Allocates a sequential identity (`Type_n`) for a type without a primary key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType`, or `FactValidation` if the type has a primary key
    /// (its identities derive from field values; see [`Network::build_fact`]).
    pub fn generate_fact_id(&self, type_name: &str) -> Result<FactId> {
        let def = self
            .type_definition(type_name)
            .ok_or_else(|| Error::unknown_type(type_name))?;
        if def.has_primary_key() {
            return Err(Error::fact_validation(
                type_name,
                "identities of primary-key types derive from their key fields",
            ));
        }
        Ok(self.fact_ids.next_sequential(type_name))
    }

    /// Builds a validated fact with its identity computed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` or `FactValidation`.
    pub fn build_fact(&self, type_name: &str, fields: Vec<(Arc<str>, Value)>) -> Result<Fact> {
        action::build_fact(&self.types.read(), &self.fact_ids, type_name, fields)
    }

    /// Reads a committed fact.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub fn fact(&self, id: &FactId) -> Result<Option<Arc<Fact>>> {
        Ok(self.storage.get(id)?)
    }

    /// Starts a transaction with the configured default options.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, self.config.transactions)
    }

    /// Starts a transaction with explicit options.
    #[must_use]
    pub fn begin_transaction_with(&self, options: TransactionOptions) -> Transaction<'_> {
        Transaction::new(self, options)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Registers an action handler, replacing any handler of the same name.
    pub fn register_action(&self, handler: Arc<dyn ActionHandler>) {
        self.actions.register(handler);
    }

    /// The action registry.
    #[must_use]
    pub const fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Installs the tuple-space callback and registers the `Xuple` action.
    pub fn set_xuple_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Arc<Fact>, &[Arc<Fact>]) -> Result<()> + Send + Sync + 'static,
    {
        self.actions.register(Arc::new(XupleAction::new(Arc::new(handler))));
    }

    /// Installs the observer of retracted activations.
    pub fn set_retraction_handler<F>(&self, handler: F)
    where
        F: Fn(&Compensation) + Send + Sync + 'static,
    {
        *self.retraction_handler.write() = Some(Arc::new(handler));
    }

    /// Redirects `print` output. The default writes to stdout.
    pub fn set_print_sink<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.print_sink.write() = Arc::new(sink);
    }

    // =========================================================================
    // Rules
    // =========================================================================

    /// Compiles and adds a rule, firing it for matching facts already present.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule`, a compile error, `CircularDependency`,
    /// `InvalidBetaChain`, or an error raised while replaying existing facts
    /// (the rule is not added in that case).
    pub fn add_rule(&self, rule: &RuleDefinition) -> Result<CommitReport> {
        let compiled = {
            let types = self.types.read();
            compile_rule(rule, &types)?
        };
        self.add_compiled_rule(compiled)
    }

    /// Adds an already compiled rule.
    ///
    /// # Errors
    ///
    /// See [`Network::add_rule`].
    pub fn add_compiled_rule(&self, rule: CompiledRule) -> Result<CommitReport> {
        self.ensure_running()?;
        let _commit = self.commit_lock.lock();
        if self.rules.read().contains_key(&rule.id) {
            return Err(Error::new(ErrorKind::DuplicateRule(rule.id.to_string())));
        }
        let tests = self.alpha_tests(&rule)?;
        let plan = plan_joins(&rule.id, &rule.variable_names(), &rule.join_conditions)
            .map_err(|err| err.in_rule(&*rule.id))?;
        for warning in &plan.report.warnings {
            warn!(rule = %rule.id, "{warning}");
        }

        let wiring = self.wire(&rule, &tests, &plan)?;
        {
            let mut lifecycle = self.lifecycle.write();
            for node in &wiring.used {
                lifecycle.register(*node, &rule.id);
            }
        }
        let id = Arc::clone(&rule.id);
        self.rules.write().insert(Arc::clone(&id), Arc::new(rule));
        info!(
            rule = %id,
            nodes = wiring.used.len(),
            created = wiring.created.len(),
            joins = plan.patterns.len(),
            reordered = plan.reordered,
            "rule added"
        );

        match self.replay(&wiring) {
            Ok(report) => Ok(report),
            Err(err) => {
                self.detach_rule(&id);
                Err(err.in_rule(&*id))
            }
        }
    }

    /// Removes a rule and destroys the nodes no other rule uses.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` for an unknown id.
    pub fn remove_rule(&self, id: &str) -> Result<()> {
        self.ensure_running()?;
        let _commit = self.commit_lock.lock();
        if !self.rules.read().contains_key(id) {
            return Err(Error::new(ErrorKind::RuleNotFound(id.to_string())));
        }
        self.detach_rule(id);
        Ok(())
    }

    /// Ids of the loaded rules, sorted.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<Arc<str>> {
        self.rules.read().keys().cloned().collect()
    }

    /// Returns a loaded rule.
    #[must_use]
    pub fn compiled_rule(&self, id: &str) -> Option<Arc<CompiledRule>> {
        self.rules.read().get(id).cloned()
    }

    /// Expands each variable's alpha conditions into node tests, validating
    /// every decomposition.
    fn alpha_tests(&self, rule: &CompiledRule) -> Result<BTreeMap<Arc<str>, Vec<AlphaTest>>> {
        {
            let types = self.types.read();
            if let Some(var) = rule.variables.iter().find(|v| types.get(&v.type_name).is_none()) {
                return Err(Error::unknown_type(&*var.type_name).in_rule(&*rule.id));
            }
        }
        let mut chains = Vec::new();
        let mut out: BTreeMap<Arc<str>, Vec<AlphaTest>> = BTreeMap::new();
        for (var, conditions) in &rule.alpha {
            if !rule.variables.iter().any(|v| v.name == *var) {
                let available = rule.variables.iter().map(|v| v.name.to_string()).collect();
                return Err(Error::unbound_variable(&**var, available).in_rule(&*rule.id));
            }
            let tests = out.entry(Arc::clone(var)).or_default();
            for condition in conditions {
                match condition {
                    AlphaCondition::Plain(expr) => tests.push(AlphaTest::Filter(expr.clone())),
                    AlphaCondition::Decomposed(chain) => {
                        let report = chain.validate().map_err(|err| {
                            if let ErrorKind::CircularDependency { path } = &err.kind {
                                self.metrics.record_circular(&rule.id, path);
                            }
                            err.in_rule(&*rule.id)
                        })?;
                        for warning in &report.warnings {
                            warn!(rule = %rule.id, variable = %var, "{warning}");
                        }
                        for step in chain.execution_order()? {
                            tests.push(AlphaTest::Step(step.clone()));
                        }
                        tests.push(AlphaTest::Comparison(chain.comparison.clone()));
                        chains.push(chain);
                    }
                }
            }
        }
        self.metrics.record_structure(&rule.id, &chains);
        Ok(out)
    }

    fn wire(
        &self,
        rule: &CompiledRule,
        tests: &BTreeMap<Arc<str>, Vec<AlphaTest>>,
        plan: &BetaPlan,
    ) -> Result<Wiring> {
        let mut graph = self.graph.write();
        let mut wiring = Wiring::default();

        // Alpha paths: the end of each variable's path, plus the variable to
        // bind if that end is still the type node.
        let mut ends: HashMap<Arc<str>, (NodeId, Option<Arc<str>>)> = HashMap::new();
        for var in &rule.variables {
            let type_node = *graph
                .type_nodes
                .get(&var.type_name)
                .ok_or_else(|| Error::unknown_type(&*var.type_name).in_rule(&*rule.id))?;
            let mut parent = type_node;
            let mut binding = Some(Arc::clone(&var.name));
            for test in tests.get(&var.name).into_iter().flatten() {
                let signature = format!("{parent}/{}:{test}", var.name);
                let id = self.ensure_node(&mut graph, signature, &mut wiring, || {
                    NodeKind::Alpha(AlphaNode::new(&var.name, test.clone()))
                });
                let edge = Edge {
                    target: id,
                    side: Side::Left,
                    variable: binding.take(),
                };
                self.link(&graph, parent, edge, &mut wiring);
                wiring.used.push(id);
                parent = id;
            }
            ends.insert(Arc::clone(&var.name), (parent, binding));
        }

        let unbound = |var: &str| {
            Error::new(ErrorKind::InvalidBetaChain {
                rule: rule.id.to_string(),
                variable: var.to_string(),
            })
        };
        let (mut tail, mut tail_binding) = ends.get(&plan.first).cloned().ok_or_else(|| unbound(&plan.first))?;
        for (pattern, prefix) in plan.patterns.iter().zip(plan.prefix_keys()) {
            let right_var = pattern.right_vars.first().ok_or_else(|| unbound("<none>"))?;
            let (right, right_binding) = ends.get(right_var).cloned().ok_or_else(|| unbound(right_var))?;
            let join_type = JoinType::classify(pattern.right_vars.len(), rule.variables.len());
            let join = JoinNode::new(
                pattern.left_vars.clone(),
                pattern.right_vars.clone(),
                pattern.conditions.clone(),
                join_type,
            );
            let signature = format!("join|L:{tail}|R:{right}|{}", join.describe());
            let cached = self
                .prefix_cache
                .get(&prefix)
                .filter(|id| graph.nodes.get(id).is_some_and(|n| n.signature == signature));
            let id = match cached {
                Some(id) => {
                    debug!(rule = %rule.id, prefix = %prefix, node = %id, "beta prefix reused");
                    id
                }
                None => {
                    debug!(rule = %rule.id, %join_type, equi = join.equi_conditions(), "join planned");
                    self.ensure_node(&mut graph, signature, &mut wiring, || NodeKind::Join(join))
                }
            };
            self.prefix_cache.put(prefix, id);
            let left = Edge {
                target: id,
                side: Side::Left,
                variable: tail_binding.take(),
            };
            self.link(&graph, tail, left, &mut wiring);
            let right_edge = Edge {
                target: id,
                side: Side::Right,
                variable: right_binding,
            };
            self.link(&graph, right, right_edge, &mut wiring);
            wiring.used.push(id);
            tail = id;
        }

        for quantified in &rule.exists {
            let source = *graph
                .type_nodes
                .get(&quantified.type_name)
                .ok_or_else(|| Error::unknown_type(&*quantified.type_name).in_rule(&*rule.id))?;
            let exists = ExistsNode::new(quantified.clone());
            let signature = format!("exists|L:{tail}|{}", exists.describe());
            let id = self.ensure_node(&mut graph, signature, &mut wiring, || NodeKind::Exists(exists));
            let left = Edge {
                target: id,
                side: Side::Left,
                variable: tail_binding.take(),
            };
            self.link(&graph, tail, left, &mut wiring);
            let right = Edge {
                target: id,
                side: Side::Right,
                variable: Some(Arc::clone(&quantified.variable)),
            };
            self.link(&graph, source, right, &mut wiring);
            debug!(rule = %rule.id, node = %id, condition = %quantified, "exists node wired");
            wiring.used.push(id);
            tail = id;
        }

        let terminal = self.ensure_node(&mut graph, format!("terminal|{}", rule.id), &mut wiring, || {
            NodeKind::Terminal {
                rule: Arc::clone(&rule.id),
            }
        });
        let edge = Edge {
            target: terminal,
            side: Side::Left,
            variable: tail_binding,
        };
        self.link(&graph, tail, edge, &mut wiring);
        wiring.used.push(terminal);
        Ok(wiring)
    }

    fn ensure_node(
        &self,
        graph: &mut Graph,
        signature: String,
        wiring: &mut Wiring,
        kind: impl FnOnce() -> NodeKind,
    ) -> NodeId {
        if let Some(id) = self.hash_cache.get(&signature) {
            if graph.nodes.contains_key(&id) {
                return id;
            }
        }
        let id = NodeId::of(&signature);
        if !graph.nodes.contains_key(&id) {
            let node = Node::new(signature.clone(), kind());
            debug!(node = %node, "node created");
            graph.nodes.insert(id, Arc::new(node));
            wiring.created.push(id);
        }
        self.hash_cache.put(signature, id);
        id
    }

    fn link(&self, graph: &Graph, parent: NodeId, edge: Edge, wiring: &mut Wiring) {
        let key = (parent, edge.clone());
        if self.connection_cache.get(&key).is_some() {
            return;
        }
        if let Some(node) = graph.nodes.get(&parent) {
            if node.connect(edge.clone()) {
                wiring.new_edges.push((parent, edge));
            }
        }
        self.connection_cache.put(key, ());
    }

    /// Feeds what existing nodes already hold into newly attached children.
    fn replay(&self, wiring: &Wiring) -> Result<CommitReport> {
        // Right inputs first, so a replayed left token meets every candidate.
        let mut pending: Vec<&(NodeId, Edge)> = wiring
            .new_edges
            .iter()
            .filter(|(parent, _)| !wiring.created.contains(parent))
            .collect();
        pending.sort_by_key(|(_, edge)| edge.side == Side::Left);
        if pending.is_empty() {
            return Ok(CommitReport::default());
        }
        let snapshot = self.snapshot();
        let mut run = Propagation::new(self);
        let fed: Result<()> = pending.into_iter().try_for_each(|(parent, edge)| {
            let Some(node) = self.node(*parent) else {
                return Ok(());
            };
            match (&node.kind, edge.variable.as_deref()) {
                (NodeKind::Type { .. }, Some(variable)) => {
                    let facts: Vec<Arc<Fact>> = node.memory().facts().cloned().collect();
                    for fact in facts {
                        let token = Token::bind(self.token_ids.allocate(), node.id, variable, fact);
                        run.replay(edge.target, edge.side, Arc::new(token))?;
                    }
                }
                _ => {
                    for token in node.output_tokens() {
                        run.replay(edge.target, edge.side, token)?;
                    }
                }
            }
            Ok(())
        });
        match fed.and_then(|()| run.fire_agenda()) {
            Ok(()) => Ok(run.finish()),
            Err(err) => {
                run.rollback_store();
                self.restore(snapshot);
                Err(err)
            }
        }
    }

    /// Unregisters a rule and destroys its orphaned nodes. Requires the commit lock.
    fn detach_rule(&self, rule: &str) {
        self.rules.write().remove(rule);
        let orphans = self.lifecycle.write().unregister_rule(rule);
        {
            let mut graph = self.graph.write();
            for id in &orphans {
                graph.nodes.remove(id);
            }
            for node in graph.nodes.values() {
                for id in &orphans {
                    node.disconnect(*id);
                }
            }
        }
        let prefix = format!("{rule}::");
        self.hash_cache.remove_where(|_, id| orphans.contains(id));
        self.prefix_cache
            .remove_where(|key, id| key.starts_with(&prefix) || orphans.contains(id));
        self.connection_cache
            .remove_where(|key, _| orphans.contains(&key.0) || orphans.contains(&key.1.target));
        self.support.lock().retain(|(owner, _), _| &**owner != rule);
        self.metrics.remove_rule(rule);
        info!(rule, removed_nodes = orphans.len(), "rule removed");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.graph.read().nodes.get(&id).cloned()
    }

    pub(crate) fn type_node(&self, type_name: &str) -> Option<Arc<Node>> {
        let graph = self.graph.read();
        graph
            .type_nodes
            .get(type_name)
            .and_then(|id| graph.nodes.get(id))
            .cloned()
    }

    pub(crate) fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.graph.read().nodes.values().cloned().collect()
    }

    /// Number of nodes, the root and type nodes included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    /// Nodes a rule holds references to, in wiring order.
    #[must_use]
    pub fn nodes_for_rule(&self, rule: &str) -> Vec<NodeId> {
        self.lifecycle.read().nodes_for_rule(rule)
    }

    /// Returns true if no rule references the node.
    #[must_use]
    pub fn can_remove_node(&self, id: NodeId) -> bool {
        self.lifecycle.read().can_remove_node(id)
    }

    /// Destroys an unreferenced rule node.
    ///
    /// # Errors
    ///
    /// Returns `NodeInUse` while a rule references the node.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.lifecycle.write().remove_node(id)?;
        let mut graph = self.graph.write();
        let removable = graph
            .nodes
            .get(&id)
            .is_some_and(|n| !matches!(n.kind, NodeKind::Root | NodeKind::Type { .. }));
        if removable {
            graph.nodes.remove(&id);
            for node in graph.nodes.values() {
                node.disconnect(id);
            }
            self.hash_cache.remove_where(|_, cached| *cached == id);
            self.connection_cache
                .remove_where(|key, _| key.0 == id || key.1.target == id);
        }
        Ok(())
    }

    /// Reference counts across all nodes.
    #[must_use]
    pub fn lifecycle_stats(&self) -> LifecycleStats {
        self.lifecycle.read().stats()
    }

    /// Tokens held by a rule's terminal node.
    #[must_use]
    pub fn terminal_tokens(&self, rule: &str) -> Vec<Arc<Token>> {
        self.node(NodeId::of(&format!("terminal|{rule}")))
            .map(|node| node.output_tokens())
            .unwrap_or_default()
    }

    /// Every activation currently in force, by rule.
    #[must_use]
    pub fn activations(&self) -> Vec<ActivationRecord> {
        self.rule_ids()
            .into_iter()
            .flat_map(|rule| {
                self.terminal_tokens(&rule)
                    .into_iter()
                    .map(move |token| ActivationRecord {
                        rule: Arc::clone(&rule),
                        fact_ids: token.key.fact_ids(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Decomposition and evaluation metrics.
    #[must_use]
    pub const fn decomposition_metrics(&self) -> &DecompositionMetrics {
        &self.metrics
    }

    /// The shared arithmetic result cache.
    #[must_use]
    pub const fn result_cache(&self) -> &ArithmeticResultCache {
        &self.results
    }

    /// A point-in-time overview.
    #[must_use]
    pub fn summary(&self) -> NetworkSummary {
        let mut summary = NetworkSummary {
            rules: self.rules.read().len(),
            facts: self.storage.len().unwrap_or_else(|err| {
                warn!(error = %err, "store size unavailable");
                0
            }),
            activations: self.activations().len(),
            lifecycle: self.lifecycle_stats(),
            result_cache: self.results.stats(),
            metrics: self.metrics.summary(),
            ..NetworkSummary::default()
        };
        for node in self.all_nodes() {
            summary.nodes += 1;
            match node.kind {
                NodeKind::Root => {}
                NodeKind::Type { .. } => summary.type_nodes += 1,
                NodeKind::Alpha(_) => summary.alpha_nodes += 1,
                NodeKind::Join(_) => summary.join_nodes += 1,
                NodeKind::Exists(_) => summary.exists_nodes += 1,
                NodeKind::Terminal { .. } => summary.terminal_nodes += 1,
            }
        }
        summary
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Counts describing a network.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkSummary {
    /// Loaded rules.
    pub rules: usize,
    /// All nodes.
    pub nodes: usize,
    /// Type nodes.
    pub type_nodes: usize,
    /// Alpha, atomic, and comparison nodes.
    pub alpha_nodes: usize,
    /// Join nodes.
    pub join_nodes: usize,
    /// Exists and not-exists nodes.
    pub exists_nodes: usize,
    /// Terminal nodes.
    pub terminal_nodes: usize,
    /// Stored facts.
    pub facts: usize,
    /// Activations in force.
    pub activations: usize,
    /// Node sharing.
    pub lifecycle: LifecycleStats,
    /// Arithmetic result cache.
    pub result_cache: ResultCacheStats,
    /// Evaluation metrics.
    pub metrics: MetricsSummary,
}

impl fmt::Display for NetworkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} rule(s), {} fact(s), {} activation(s)",
            self.rules, self.facts, self.activations
        )?;
        writeln!(
            f,
            "nodes: {} ({} type, {} alpha, {} join, {} exists, {} terminal; {} shared)",
            self.nodes,
            self.type_nodes,
            self.alpha_nodes,
            self.join_nodes,
            self.exists_nodes,
            self.terminal_nodes,
            self.lifecycle.shared_nodes
        )?;
        writeln!(
            f,
            "result cache: {}/{} entries, {:.1}% hits",
            self.result_cache.size,
            self.result_cache.capacity,
            self.result_cache.hit_rate() * 100.0
        )?;
        write!(f, "{}", self.metrics)
    }
}
