//! Token propagation and the agenda.
//!
//! One [`Propagation`] runs per commit (or per rule replay) while the commit
//! lock is held. Deliveries go through a FIFO work queue so every node sees
//! its inputs in production order. Terminal nodes push activations onto the
//! agenda, which is drained after the queue; actions fired from the agenda
//! feed new work back into the same queue.
//!
//! Store writes made along the way are journaled so a failed commit can put
//! the store back exactly as it was. Effects seen outside the engine (deferred
//! action calls and retraction callbacks) wait in an outbox that only
//! [`Propagation::finish`] delivers; a run that is rolled back drops it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use trellis_foundation::{Error, Fact, FactId, Result, SemanticLimit};

use crate::action::executor::run_job;
use crate::action::{ActionServices, Deferred, Effect, ExecutionContext};
use crate::alpha::{AlphaContext, StoredFacts};
use crate::exists::ExistsOutcome;
use crate::join::JoinContext;
use crate::network::Network;
use crate::node::{Node, NodeId, NodeKind, NodeSnapshot, Side};
use crate::token::{Token, TokenKey};
use crate::transaction::CommitReport;

/// Facts inserted by each activation, keyed by `(rule, token)`.
pub(crate) type SupportMap = HashMap<(Arc<str>, TokenKey), Vec<FactId>>;

/// A rule instantiation that went out of force.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compensation {
    /// The rule.
    pub rule: Arc<str>,
    /// Facts the retracted activation had bound, in binding order.
    pub fact_ids: Vec<FactId>,
}

/// A rule instantiation currently in force.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationRecord {
    /// The rule.
    pub rule: Arc<str>,
    /// Bound facts, in binding order.
    pub fact_ids: Vec<FactId>,
}

#[derive(Debug)]
struct Activation {
    rule: Arc<str>,
    terminal: NodeId,
    token: Arc<Token>,
}

/// An external effect waiting for the run to succeed.
enum Outbound {
    Action { rule: Arc<str>, call: Deferred },
    Retracted(Compensation),
}

/// Saved memories of every node plus the support map.
#[derive(Debug)]
pub(crate) struct NetworkSnapshot {
    nodes: Vec<(Arc<Node>, NodeSnapshot)>,
    support: SupportMap,
}

impl Network {
    pub(crate) fn snapshot(&self) -> NetworkSnapshot {
        let nodes = self
            .all_nodes()
            .into_iter()
            .map(|node| {
                let snapshot = node.snapshot();
                (node, snapshot)
            })
            .collect();
        NetworkSnapshot {
            nodes,
            support: self.support.lock().clone(),
        }
    }

    pub(crate) fn restore(&self, snapshot: NetworkSnapshot) {
        for (node, saved) in snapshot.nodes {
            node.restore(saved);
        }
        *self.support.lock() = snapshot.support;
    }
}

/// One run of propagation.
pub(crate) struct Propagation<'n> {
    net: &'n Network,
    queue: VecDeque<(NodeId, Side, Arc<Token>)>,
    agenda: VecDeque<Activation>,
    journal: Vec<(FactId, Option<Arc<Fact>>)>,
    outbox: Vec<Outbound>,
    lost: Vec<(Arc<str>, Arc<Token>)>,
    report: CommitReport,
}

impl<'n> Propagation<'n> {
    pub(crate) fn new(net: &'n Network) -> Self {
        Self {
            net,
            queue: VecDeque::new(),
            agenda: VecDeque::new(),
            journal: Vec::new(),
            outbox: Vec::new(),
            lost: Vec::new(),
            report: CommitReport::default(),
        }
    }

    /// Delivers the outbox and returns the report. Call only once the run succeeded.
    pub(crate) fn finish(mut self) -> CommitReport {
        let handler = self.net.retraction_handler.read().clone();
        for outbound in std::mem::take(&mut self.outbox) {
            match outbound {
                Outbound::Action { rule, call } => {
                    if let Err(err) = call() {
                        let err = if err.context.is_some() { err } else { err.in_rule(&*rule) };
                        warn!(rule = %rule, error = %err, "deferred action failed");
                        self.report.action_errors.push(err);
                    }
                }
                Outbound::Retracted(compensation) => {
                    if let Some(handler) = &handler {
                        handler(&compensation);
                    }
                }
            }
        }
        self.report
    }

    /// Number of external effects waiting for [`Propagation::finish`].
    #[cfg(test)]
    pub(crate) fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // =========================================================================
    // Store writes
    // =========================================================================

    /// Writes a fact to the store, returning the version it replaced.
    pub(crate) fn put(&mut self, fact: Arc<Fact>) -> Result<Option<Arc<Fact>>> {
        let id = fact.id().clone();
        let prior = self.net.storage.put(fact)?;
        self.journal.push((id, prior.clone()));
        Ok(prior)
    }

    /// Removes a fact from the store, returning it.
    pub(crate) fn delete(&mut self, id: &FactId) -> Result<Option<Arc<Fact>>> {
        let prior = self.net.storage.remove(id)?;
        if prior.is_some() {
            self.journal.push((id.clone(), prior.clone()));
        }
        Ok(prior)
    }

    /// Undoes every journaled store write, newest first.
    pub(crate) fn rollback_store(&mut self) {
        for (id, prior) in self.journal.drain(..).rev() {
            let undone = match prior {
                Some(fact) => self.net.storage.put(fact).map(drop),
                None => self.net.storage.remove(&id).map(drop),
            };
            if let Err(err) = undone {
                warn!(fact = %id, error = %err, "store rollback failed");
            }
        }
    }

    // =========================================================================
    // Assert / Retract
    // =========================================================================

    /// Feeds a fact into its type node and drains the work queue.
    pub(crate) fn assert(&mut self, fact: Arc<Fact>) -> Result<()> {
        let Some(type_node) = self.net.type_node(fact.type_name()) else {
            return Err(Error::unknown_type(fact.type_name()));
        };
        trace!(fact = %fact.id(), "assert");
        type_node.memory_mut().add_fact(Arc::clone(&fact));
        for edge in type_node.successors() {
            let Some(variable) = edge.variable.as_deref() else {
                continue;
            };
            let token = Token::bind(self.net.token_ids.allocate(), type_node.id, variable, Arc::clone(&fact));
            self.queue.push_back((edge.target, edge.side, Arc::new(token)));
        }
        self.report.asserted += 1;
        self.drain()
    }

    /// Removes a fact from every memory below its type node.
    ///
    /// Activations that lose the fact are compensated, and facts they
    /// inserted are retracted in turn. Exists nodes that lose a witness (or,
    /// negated, their last blocker) pass the change on.
    pub(crate) fn retract(&mut self, fact: &Arc<Fact>) -> Result<()> {
        let id = fact.id();
        let Some(type_node) = self.net.type_node(fact.type_name()) else {
            return Ok(());
        };
        trace!(fact = %id, "retract");
        type_node.memory_mut().remove_fact(id);

        let mut frontier: VecDeque<NodeId> = type_node.successors().into_iter().map(|e| e.target).collect();
        let mut visited = HashSet::new();
        let mut shifted = Vec::new();
        while let Some(node_id) = frontier.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(node) = self.net.node(node_id) else {
                continue;
            };
            if let Some(join) = node.as_join() {
                join.retract(id);
            }
            if let Some(exists) = node.as_exists() {
                let outcome = exists.retract(node.id, id, &self.net.token_ids);
                if !outcome.is_empty() {
                    shifted.push((Arc::clone(&node), outcome));
                }
            }
            let removed = node.memory_mut().remove_tokens_with_fact(id);
            if let Some(rule) = node.terminal_rule() {
                self.lost
                    .extend(removed.into_iter().map(|token| (Arc::clone(rule), token)));
            }
            frontier.extend(node.successors().into_iter().map(|e| e.target));
        }
        self.report.retracted += 1;

        for (node, outcome) in shifted {
            self.shift(&node, outcome);
        }
        self.drain()
    }

    fn compensate(&mut self, rule: &Arc<str>, token: &Token) -> Result<()> {
        let compensation = Compensation {
            rule: Arc::clone(rule),
            fact_ids: token.key.fact_ids(),
        };
        debug!(rule = %rule, token = %token.key, "activation retracted");
        self.outbox.push(Outbound::Retracted(compensation));
        let supported = self
            .net
            .support
            .lock()
            .remove(&(Arc::clone(rule), token.key.clone()))
            .unwrap_or_default();
        for id in supported {
            if let Some(fact) = self.delete(&id)? {
                debug!(rule = %rule, fact = %id, "retracting logically supported fact");
                self.retract(&fact)?;
            }
        }
        Ok(())
    }

    /// Delivers one token to an existing node's input, as rule replay does.
    pub(crate) fn replay(&mut self, target: NodeId, side: Side, token: Arc<Token>) -> Result<()> {
        self.queue.push_back((target, side, token));
        self.drain()
    }

    // =========================================================================
    // Work queue
    // =========================================================================

    /// Runs the work queue dry, compensating activations withdrawn on the way.
    fn drain(&mut self) -> Result<()> {
        loop {
            while let Some((target, side, token)) = self.queue.pop_front() {
                let Some(node) = self.net.node(target) else {
                    continue;
                };
                self.deliver(&node, side, &token);
            }
            if self.lost.is_empty() {
                return Ok(());
            }
            for (rule, token) in std::mem::take(&mut self.lost) {
                self.compensate(&rule, &token)?;
            }
        }
    }

    fn deliver(&mut self, node: &Arc<Node>, side: Side, token: &Arc<Token>) {
        let net = self.net;
        let facts = StoredFacts(&*net.storage);
        match &node.kind {
            NodeKind::Root | NodeKind::Type { .. } => {
                trace!(node = %node.id, "token delivered to a source node; ignored");
            }
            NodeKind::Alpha(alpha) => {
                let ctx = AlphaContext {
                    patterns: &net.patterns,
                    facts: &facts,
                    cache: &net.results,
                    ids: &net.token_ids,
                };
                let started = Instant::now();
                let result = alpha.activate(node.id, token, &ctx);
                let elapsed = started.elapsed();
                if net.metrics.is_enabled() {
                    let cache_hit = result.as_ref().ok().and_then(|o| o.cache_hit);
                    for rule in net.lifecycle.read().rules_for_node(node.id) {
                        net.metrics.record_evaluation(&rule, elapsed, result.is_ok());
                        if let Some(hit) = cache_hit {
                            net.metrics.record_cache(&rule, hit);
                        }
                    }
                }
                match result {
                    Ok(outcome) => {
                        if let Some(passed) = outcome.token {
                            self.emit(node, Arc::new(passed));
                        }
                    }
                    Err(err) => {
                        warn!(node = %node.id, token = %token.key, error = %err, "alpha test failed; token dropped");
                    }
                }
            }
            NodeKind::Join(join) => {
                let ctx = JoinContext {
                    patterns: &net.patterns,
                    facts: &facts,
                    ids: &net.token_ids,
                };
                let outcome = join.activate(node.id, side, token, &ctx);
                if outcome.failed > 0 && net.metrics.is_enabled() {
                    for rule in net.lifecycle.read().rules_for_node(node.id) {
                        for _ in 0..outcome.failed {
                            net.metrics.record_evaluation(&rule, Duration::ZERO, false);
                        }
                    }
                }
                for joined in outcome.emitted {
                    self.emit(node, Arc::new(joined));
                }
            }
            NodeKind::Exists(exists) => {
                let ctx = JoinContext {
                    patterns: &net.patterns,
                    facts: &facts,
                    ids: &net.token_ids,
                };
                let outcome = exists.activate(node.id, side, token, &ctx);
                if outcome.failed > 0 && net.metrics.is_enabled() {
                    for rule in net.lifecycle.read().rules_for_node(node.id) {
                        for _ in 0..outcome.failed {
                            net.metrics.record_evaluation(&rule, Duration::ZERO, false);
                        }
                    }
                }
                self.shift(node, outcome);
            }
            NodeKind::Terminal { rule } => {
                let fresh = node.memory_mut().add_token(Arc::clone(token)).is_none();
                if fresh {
                    trace!(rule = %rule, token = %token.key, "activation");
                    self.agenda.push_back(Activation {
                        rule: Arc::clone(rule),
                        terminal: node.id,
                        token: Arc::clone(token),
                    });
                }
            }
        }
    }

    fn emit(&mut self, node: &Node, token: Arc<Token>) {
        node.memory_mut().add_token(Arc::clone(&token));
        for edge in node.successors() {
            self.queue.push_back((edge.target, edge.side, Arc::clone(&token)));
        }
    }

    /// Applies what an exists node let through or stopped.
    fn shift(&mut self, node: &Node, outcome: ExistsOutcome) {
        for key in &outcome.withdrawn {
            self.withdraw(node, key);
        }
        for token in outcome.emitted {
            self.emit(node, Arc::new(token));
        }
    }

    /// Removes a token that stopped passing `node`, and everything it fed.
    ///
    /// Only exists and terminal nodes sit below an exists node, and both keep
    /// the key of the token they were given.
    fn withdraw(&mut self, node: &Node, key: &TokenKey) {
        if node.memory_mut().remove_token(key).is_none() {
            return;
        }
        trace!(node = %node.id, token = %key, "token withdrawn");
        for edge in node.successors() {
            let Some(next) = self.net.node(edge.target) else {
                continue;
            };
            match &next.kind {
                NodeKind::Exists(exists) => {
                    if exists.withdraw(key) {
                        self.withdraw(&next, key);
                    }
                }
                NodeKind::Terminal { rule } => {
                    if let Some(token) = next.memory_mut().remove_token(key) {
                        self.lost.push((Arc::clone(rule), token));
                    }
                }
                _ => warn!(node = %next.id, token = %key, "withdrawal reached an unexpected node"),
            }
        }
    }

    // =========================================================================
    // Agenda
    // =========================================================================

    /// Fires pending activations until the agenda is empty.
    ///
    /// Action failures are recorded in the report and end that activation's
    /// action list only.
    ///
    /// # Errors
    ///
    /// Returns `LimitExceeded` when the activation kill switch trips, or a
    /// storage error raised while applying an action's effects.
    pub(crate) fn fire_agenda(&mut self) -> Result<()> {
        while let Some(activation) = self.agenda.pop_front() {
            let live = self.net.node(activation.terminal).is_some_and(|node| {
                node.memory()
                    .get_token(&activation.token.key)
                    .is_some_and(|t| t.id == activation.token.id)
            });
            if !live {
                trace!(rule = %activation.rule, token = %activation.token.key, "stale activation skipped");
                continue;
            }
            let limit = self.net.config.max_activations;
            if self.report.fired >= limit {
                return Err(Error::limit_exceeded(SemanticLimit::MaxActivations {
                    limit,
                    context: Some(format!("rule {}", activation.rule)),
                }));
            }
            self.report.fired += 1;
            self.net.metrics.record_activation(&activation.rule);
            self.fire(&activation)?;
        }
        Ok(())
    }

    fn fire(&mut self, activation: &Activation) -> Result<()> {
        let net = self.net;
        let Some(rule) = net.compiled_rule(&activation.rule) else {
            return Ok(());
        };
        debug!(rule = %activation.rule, token = %activation.token.key, "firing");
        let types = net.types.read();
        let print = net.print_sink.read().clone();
        let services = ActionServices {
            storage: &*net.storage,
            types: &types,
            fact_ids: &net.fact_ids,
            patterns: &net.patterns,
            print: &print,
        };
        let mut ctx = ExecutionContext::new(&activation.rule, &activation.token, services);
        for job in &rule.actions {
            let outcome = run_job(&net.actions, job, &mut ctx);
            let effects = ctx.take_effects();
            let deferred = ctx.take_deferred();
            if let Err(err) = outcome {
                warn!(rule = %activation.rule, action = &*job.name, error = %err, "action failed; remaining actions skipped");
                self.report.action_errors.push(err);
                break;
            }
            self.outbox.extend(deferred.into_iter().map(|call| Outbound::Action {
                rule: Arc::clone(&activation.rule),
                call,
            }));
            self.apply(activation, effects)?;
        }
        Ok(())
    }

    fn apply(&mut self, activation: &Activation, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::Insert(fact) => {
                    if let Some(old) = self.put(Arc::clone(&fact))? {
                        self.retract(&old)?;
                    }
                    self.net
                        .support
                        .lock()
                        .entry((Arc::clone(&activation.rule), activation.token.key.clone()))
                        .or_default()
                        .push(fact.id().clone());
                    self.assert(fact)?;
                }
                Effect::Retract(id) => match self.delete(&id)? {
                    Some(old) => self.retract(&old)?,
                    None => debug!(rule = %activation.rule, fact = %id, "retract of unknown fact ignored"),
                },
                Effect::Update { previous, fact } => {
                    if let Some(previous) = previous {
                        if let Some(old) = self.delete(&previous)? {
                            self.retract(&old)?;
                        }
                    }
                    if let Some(old) = self.put(Arc::clone(&fact))? {
                        self.retract(&old)?;
                    }
                    self.assert(fact)?;
                }
            }
        }
        Ok(())
    }
}
