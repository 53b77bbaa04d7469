//! Dependency-graph validation.
//!
//! The detector holds a named graph (`node -> nodes it depends on`) and checks
//! it with a three-colour depth-first search. It is run on every arithmetic
//! decomposition at rule load and on the variable production order of every
//! beta chain.

use std::collections::{BTreeMap, BTreeSet};

use trellis_foundation::{Error, ErrorKind, Result};

/// Depth above which a validation report carries a warning.
pub const DEEP_CHAIN_WARNING_DEPTH: usize = 10;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Outcome of [`CircularDependencyDetector::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// True if the graph is acyclic and every dependency is declared.
    pub valid: bool,
    /// True if a cycle was found.
    pub has_circular_deps: bool,
    /// The cycle, starting and ending with the same node.
    pub cycle_path: Vec<String>,
    /// Longest dependency chain, counted in nodes.
    pub max_depth: usize,
    /// Number of declared nodes.
    pub total_nodes: usize,
    /// Nodes with no dependencies and no dependents.
    pub isolated_nodes: Vec<String>,
    /// Why the graph is invalid.
    pub error_message: Option<String>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Converts an invalid report into the matching error.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::CircularDependency`] for a cycle and
    /// [`ErrorKind::InvalidDependencies`] for any other problem.
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else if self.has_circular_deps {
            Err(Error::circular_dependency(self.cycle_path))
        } else {
            Err(Error::new(ErrorKind::InvalidDependencies(
                self.error_message.unwrap_or_default(),
            )))
        }
    }
}

/// A named dependency graph with cycle detection and topological ordering.
///
/// ```
/// use trellis_engine::dependency::CircularDependencyDetector;
///
/// let mut graph = CircularDependencyDetector::new();
/// graph.add_node("temp_1", &[]);
/// graph.add_node("temp_2", &["temp_1"]);
/// assert_eq!(graph.topological_sort().unwrap(), ["temp_1", "temp_2"]);
/// assert_eq!(graph.validate().max_depth, 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CircularDependencyDetector {
    nodes: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
}

impl CircularDependencyDetector {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node and what it depends on. Redeclaring replaces the dependencies.
    pub fn add_node(&mut self, name: &str, deps: &[&str]) {
        if !self.nodes.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.nodes
            .insert(name.to_string(), deps.iter().map(|d| (*d).to_string()).collect());
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds a cycle, if any, as a path starting and ending with the same node.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colour: BTreeMap<&str, Colour> =
            self.nodes.keys().map(|k| (k.as_str(), Colour::White)).collect();
        let mut stack: Vec<&str> = Vec::new();
        for start in &self.order {
            if colour.get(start.as_str()) == Some(&Colour::White) {
                if let Some(cycle) = self.visit(start, &mut colour, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        colour: &mut BTreeMap<&'a str, Colour>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colour.insert(node, Colour::Grey);
        stack.push(node);
        for dep in self.nodes.get(node).into_iter().flatten() {
            match colour.get(dep.as_str()) {
                Some(Colour::Grey) => {
                    let from = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[from..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(Colour::White) => {
                    if let Some(cycle) = self.visit(dep, colour, stack) {
                        return Some(cycle);
                    }
                }
                // Finished, or undeclared (reported by validate).
                Some(Colour::Black) | None => {}
            }
        }
        stack.pop();
        colour.insert(node, Colour::Black);
        None
    }

    /// Orders the nodes so every node follows its dependencies.
    ///
    /// Ties keep declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::CircularDependency`] if the graph has a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(Error::circular_dependency(cycle));
        }
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut out = Vec::with_capacity(self.nodes.len());
        for name in &self.order {
            self.emit(name, &mut done, &mut out);
        }
        Ok(out)
    }

    fn emit<'a>(&'a self, node: &'a str, done: &mut BTreeSet<&'a str>, out: &mut Vec<String>) {
        if !done.insert(node) {
            return;
        }
        for dep in self.nodes.get(node).into_iter().flatten() {
            if self.nodes.contains_key(dep) {
                self.emit(dep, done, out);
            }
        }
        out.push(node.to_string());
    }

    /// Longest chain of declared nodes ending at `node`, counting `node` itself.
    fn depth<'a>(&'a self, node: &'a str, memo: &mut BTreeMap<&'a str, usize>) -> usize {
        if let Some(d) = memo.get(node) {
            return *d;
        }
        memo.insert(node, 1);
        let below = self
            .nodes
            .get(node)
            .into_iter()
            .flatten()
            .filter(|d| self.nodes.contains_key(d.as_str()))
            .map(|d| self.depth(d, memo))
            .max()
            .unwrap_or(0);
        memo.insert(node, below + 1);
        below + 1
    }

    /// Checks the graph and describes it.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            total_nodes: self.nodes.len(),
            ..ValidationReport::default()
        };

        if let Some(cycle) = self.find_cycle() {
            report.valid = false;
            report.has_circular_deps = true;
            report.error_message = Some(format!("circular dependency: {}", cycle.join(" → ")));
            report.cycle_path = cycle;
            return report;
        }

        let missing: Vec<String> = self
            .nodes
            .iter()
            .flat_map(|(name, deps)| {
                deps.iter()
                    .filter(|d| !self.nodes.contains_key(d.as_str()))
                    .map(move |d| format!("{name} → {d}"))
            })
            .collect();
        if !missing.is_empty() {
            report.valid = false;
            report.error_message = Some(format!("undeclared dependencies: {}", missing.join(", ")));
        }

        let mut memo = BTreeMap::new();
        report.max_depth = self
            .order
            .iter()
            .map(|n| self.depth(n, &mut memo))
            .max()
            .unwrap_or(0);
        if report.max_depth > DEEP_CHAIN_WARNING_DEPTH {
            report.warnings.push(format!(
                "dependency depth {} exceeds {DEEP_CHAIN_WARNING_DEPTH}",
                report.max_depth
            ));
        }

        let depended_on: BTreeSet<&str> = self
            .nodes
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        report.isolated_nodes = self
            .order
            .iter()
            .filter(|n| {
                self.nodes.get(n.as_str()).is_none_or(Vec::is_empty)
                    && !depended_on.contains(n.as_str())
            })
            .cloned()
            .collect();

        report
    }
}
