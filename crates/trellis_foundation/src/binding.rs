//! Persistent variable bindings carried by tokens.
//!
//! A [`BindingChain`] is an immutable singly-linked list of `(variable, fact)`
//! cells. Adding a binding allocates one cell whose tail is the existing chain,
//! so chains built along different network paths share their common suffix.

use std::fmt;
use std::sync::Arc;

use crate::fact::Fact;

struct BindingCell {
    variable: Arc<str>,
    fact: Arc<Fact>,
    parent: Option<Arc<BindingCell>>,
    depth: usize,
}

/// Immutable map from variable name to fact with structural sharing.
///
/// The head binding shadows older bindings of the same variable.
#[derive(Clone, Default)]
pub struct BindingChain {
    head: Option<Arc<BindingCell>>,
}

impl BindingChain {
    /// Returns the empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Creates a chain with a single binding.
    #[must_use]
    pub fn single(variable: &str, fact: Arc<Fact>) -> Self {
        Self::new().add(variable, fact)
    }

    /// Returns a new chain with `variable` bound to `fact` at the head.
    #[must_use]
    pub fn add(&self, variable: &str, fact: Arc<Fact>) -> Self {
        Self {
            head: Some(Arc::new(BindingCell {
                variable: Arc::from(variable),
                fact,
                parent: self.head.clone(),
                depth: self.len() + 1,
            })),
        }
    }

    /// Looks up a variable, returning the most recent binding.
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&Arc<Fact>> {
        self.cells()
            .find(|cell| &*cell.variable == variable)
            .map(|cell| &cell.fact)
    }

    /// Returns true if the variable is bound.
    #[must_use]
    pub fn has(&self, variable: &str) -> bool {
        self.get(variable).is_some()
    }

    /// Returns the number of cells (shadowed bindings included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |cell| cell.depth)
    }

    /// Returns true if the chain has no bindings.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns the chain without its head binding.
    #[must_use]
    pub fn parent(&self) -> Self {
        Self {
            head: self.head.as_ref().and_then(|cell| cell.parent.clone()),
        }
    }

    /// Returns the distinct bound variables, oldest binding first.
    #[must_use]
    pub fn variables(&self) -> Vec<Arc<str>> {
        let mut vars: Vec<Arc<str>> = Vec::with_capacity(self.len());
        for cell in self.oldest_first() {
            if !vars.iter().any(|v| *v == cell.variable) {
                vars.push(Arc::clone(&cell.variable));
            }
        }
        vars
    }

    /// Iterates over `(variable, fact)` pairs from the head (most recent) backwards.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Fact>)> {
        self.cells().map(|cell| (&*cell.variable, &cell.fact))
    }

    /// Returns a chain containing this chain's bindings followed by `other`'s,
    /// so `other` shadows on conflict.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged = self.clone();
        for cell in other.oldest_first() {
            merged = merged.add(&cell.variable, Arc::clone(&cell.fact));
        }
        merged
    }

    /// Returns true if the two chains bind at least one common variable.
    #[must_use]
    pub fn shares_variable_with(&self, other: &Self) -> bool {
        self.cells().any(|cell| other.has(&cell.variable))
    }

    fn cells(&self) -> impl Iterator<Item = &BindingCell> {
        std::iter::successors(self.head.as_deref(), |cell| cell.parent.as_deref())
    }

    fn oldest_first(&self) -> Vec<&BindingCell> {
        let mut cells: Vec<&BindingCell> = self.cells().collect();
        cells.reverse();
        cells
    }
}

impl PartialEq for BindingChain {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.cells()
            .zip(other.cells())
            .all(|(a, b)| a.variable == b.variable && a.fact.id() == b.fact.id())
    }
}

impl fmt::Debug for BindingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for BindingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingChain{{")?;
        for (i, cell) in self.oldest_first().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", cell.variable, cell.fact.id())?;
        }
        write!(f, "}}")
    }
}
