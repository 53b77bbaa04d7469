//! Strongly consistent transactions.
//!
//! A [`Transaction`] buffers fact submissions and retractions. Nothing reaches
//! the store or the network until [`Transaction::commit`], which runs under
//! the network's commit lock:
//!
//! 1. write every pending operation to the store, journaling prior versions
//! 2. read the writes back until they are visible, with exponential backoff
//! 3. propagate the changes and fire the agenda
//!
//! Any failure restores the store from the journal and every node memory from
//! the snapshot taken before step 1, then returns the error.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result, primary_key_identity};

use crate::network::Network;
use crate::propagate::Propagation;

/// Upper bound of the verification backoff.
pub const MAX_VERIFY_BACKOFF: Duration = Duration::from_millis(500);

// =============================================================================
// Options
// =============================================================================

/// Per-transaction settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionOptions {
    /// Time from `begin` after which submission and verification give up.
    pub submission_timeout: Duration,
    /// Delay before the first verification retry.
    pub verify_retry_delay: Duration,
    /// Verification retries after the first read-back.
    pub max_verify_retries: u32,
    /// Whether commit reads writes back before propagating.
    pub verify_on_commit: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            submission_timeout: Duration::from_secs(30),
            verify_retry_delay: Duration::from_millis(50),
            max_verify_retries: 10,
            verify_on_commit: true,
        }
    }
}

impl TransactionOptions {
    /// Sets the submission timeout.
    #[must_use]
    pub const fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    /// Sets the first retry delay.
    #[must_use]
    pub const fn with_verify_retry_delay(mut self, delay: Duration) -> Self {
        self.verify_retry_delay = delay;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_max_verify_retries(mut self, retries: u32) -> Self {
        self.max_verify_retries = retries;
        self
    }

    /// Turns read-back verification on or off.
    #[must_use]
    pub const fn with_verify_on_commit(mut self, verify: bool) -> Self {
        self.verify_on_commit = verify;
        self
    }

    /// Delay before retry `attempt` (1-based): `delay * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.verify_retry_delay
            .checked_mul(factor)
            .map_or(MAX_VERIFY_BACKOFF, |d| d.min(MAX_VERIFY_BACKOFF))
    }

    /// Rejects unusable settings.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] for a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.submission_timeout.is_zero() {
            return Err(Error::new(ErrorKind::InvalidConfig(
                "submission_timeout must be > 0".into(),
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Commit Report
// =============================================================================

/// What a commit did.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Facts fed into the network.
    pub asserted: usize,
    /// Facts removed from the network.
    pub retracted: usize,
    /// Activations fired.
    pub fired: usize,
    /// Errors that ended an action list early. The commit itself succeeded.
    pub action_errors: Vec<Error>,
}

impl CommitReport {
    /// Returns true if every action list ran to completion.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.action_errors.is_empty()
    }

    /// Adds another report's counts and errors to this one.
    pub fn merge(&mut self, other: Self) {
        self.asserted += other.asserted;
        self.retracted += other.retracted;
        self.fired += other.fired;
        self.action_errors.extend(other.action_errors);
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Clone, Debug)]
enum PendingOp {
    Submit(Arc<Fact>),
    Retract(FactId),
}

impl PendingOp {
    fn id(&self) -> &FactId {
        match self {
            Self::Submit(fact) => fact.id(),
            Self::Retract(id) => id,
        }
    }
}

/// A batch of fact changes applied atomically by [`Transaction::commit`].
#[derive(Debug)]
pub struct Transaction<'n> {
    network: &'n Network,
    options: TransactionOptions,
    ops: Vec<PendingOp>,
    started: Instant,
    open: bool,
}

impl<'n> Transaction<'n> {
    pub(crate) fn new(network: &'n Network, options: TransactionOptions) -> Self {
        Self {
            network,
            options,
            ops: Vec::new(),
            started: Instant::now(),
            open: true,
        }
    }

    /// Options in force.
    #[must_use]
    pub const fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Returns true until the transaction is committed or rolled back.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ops.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::TransactionClosed))
        }
    }

    fn check_timeout(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.options.submission_timeout {
            return Err(Error::new(ErrorKind::SubmissionTimeout {
                elapsed_ms: elapsed.as_millis(),
            }));
        }
        Ok(())
    }

    /// Buffers a fact. A fact whose identity already exists replaces it on commit.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, `UnknownType`, or `FactValidation` when the
    /// fields or the identity do not match the declared type.
    pub fn submit(&mut self, fact: impl Into<Arc<Fact>>) -> Result<()> {
        self.ensure_open()?;
        self.network.ensure_running()?;
        let fact = fact.into();
        let def = self
            .network
            .type_definition(fact.type_name())
            .ok_or_else(|| Error::unknown_type(fact.type_name()))?;
        def.validate(fact.fields().iter().map(|(name, value)| (&**name, value)))?;
        if let Some(expected) = primary_key_identity(&def, |name| fact.get(name))? {
            if &expected != fact.id() {
                return Err(Error::fact_validation(
                    fact.type_name(),
                    format!("identity {} does not match primary key {expected}", fact.id()),
                ));
            }
        }
        self.ops.push(PendingOp::Submit(fact));
        Ok(())
    }

    /// Buffers a retraction. Retracting an unknown identity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed` after commit or rollback.
    pub fn retract(&mut self, id: impl Into<FactId>) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(PendingOp::Retract(id.into()));
        Ok(())
    }

    /// Reads a fact, seeing this transaction's own pending writes first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub fn get(&self, id: &FactId) -> Result<Option<Arc<Fact>>> {
        for op in self.ops.iter().rev() {
            match op {
                PendingOp::Submit(fact) if fact.id() == id => return Ok(Some(Arc::clone(fact))),
                PendingOp::Retract(gone) if gone == id => return Ok(None),
                _ => {}
            }
        }
        Ok(self.network.storage.get(id)?)
    }

    /// Discards every pending operation and closes the transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed` if already closed.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.open = false;
        debug!(discarded = self.ops.len(), "transaction rolled back");
        self.ops.clear();
        Ok(())
    }

    /// Applies every pending operation and closes the transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, `NetworkShutdown`, `SubmissionTimeout`,
    /// `VerificationFailed`, `LimitExceeded`, or a storage error. On error the
    /// store and the network are left as they were before the commit.
    pub fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_open()?;
        self.open = false;
        let net = self.network;
        net.ensure_running()?;
        let ops = std::mem::take(&mut self.ops);
        self.check_timeout()?;

        let _commit = net.commit_lock.lock();
        let snapshot = net.snapshot();
        let mut run = Propagation::new(net);
        match self.apply(&mut run, &ops) {
            Ok(()) => {
                let report = run.finish();
                info!(
                    operations = ops.len(),
                    asserted = report.asserted,
                    retracted = report.retracted,
                    fired = report.fired,
                    action_errors = report.action_errors.len(),
                    "commit"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "commit failed; rolling back");
                run.rollback_store();
                net.restore(snapshot);
                Err(err)
            }
        }
    }

    fn apply(&self, run: &mut Propagation<'_>, ops: &[PendingOp]) -> Result<()> {
        let mut priors = Vec::with_capacity(ops.len());
        for op in ops {
            self.check_timeout()?;
            let prior = match op {
                PendingOp::Submit(fact) => run.put(Arc::clone(fact))?,
                PendingOp::Retract(id) => run.delete(id)?,
            };
            priors.push(prior);
        }

        if self.options.verify_on_commit {
            let mut expected: HashMap<&FactId, Option<&Arc<Fact>>> = HashMap::new();
            for op in ops {
                let state = match op {
                    PendingOp::Submit(fact) => Some(fact),
                    PendingOp::Retract(_) => None,
                };
                expected.insert(op.id(), state);
            }
            for (id, state) in expected {
                self.verify(id, state)?;
            }
        }

        for (op, prior) in ops.iter().zip(priors) {
            if let Some(old) = prior {
                run.retract(&old)?;
            }
            if let PendingOp::Submit(fact) = op {
                run.assert(Arc::clone(fact))?;
            }
        }
        run.fire_agenda()
    }

    fn verify(&self, id: &FactId, expected: Option<&Arc<Fact>>) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let stored = self.network.storage.get(id)?;
            let visible = match (expected, &stored) {
                (Some(want), Some(got)) => got.id() == want.id() && got.same_fields(want),
                (None, None) => true,
                _ => false,
            };
            if visible {
                return Ok(());
            }
            if attempts > self.options.max_verify_retries {
                return Err(Error::new(ErrorKind::VerificationFailed {
                    fact: id.clone(),
                    attempts,
                }));
            }
            self.check_timeout()?;
            let delay = self.options.backoff(attempts);
            debug!(fact = %id, attempt = attempts, ?delay, "write not visible yet; retrying");
            thread::sleep(delay);
        }
    }
}
