//! Per-rule decomposition and evaluation metrics.
//!
//! Recording is a no-op unless [`MetricsConfig::enabled`] is set. At most
//! `max_tracked_rules` rules are tracked; the least recently seen rule is
//! dropped to make room.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::MetricsConfig;
use crate::decompose::DecomposedChain;

/// Metrics of one rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleMetrics {
    /// Rule id.
    pub rule: Arc<str>,
    /// Times the rule fired.
    pub activations: u64,
    /// Alpha evaluations along the rule's paths.
    pub evaluations: u64,
    /// Evaluations that completed.
    pub successful: u64,
    /// Evaluations that raised an error.
    pub failed: u64,
    /// Sum of evaluation times.
    pub total_time: Duration,
    /// Fastest evaluation.
    pub min_time: Option<Duration>,
    /// Slowest evaluation.
    pub max_time: Duration,
    /// Evaluation counts per histogram bucket.
    pub histogram: Vec<u64>,
    /// Atomic step results served from the cache.
    pub cache_hits: u64,
    /// Atomic step results computed.
    pub cache_misses: u64,
    /// Atomic steps plus comparisons over all decomposed conditions.
    pub chain_length: usize,
    /// Atomic steps over all decomposed conditions.
    pub atomic_steps: usize,
    /// Comparison steps over all decomposed conditions.
    pub comparison_steps: usize,
    /// Longest chain of dependent steps.
    pub max_dependency_depth: usize,
    /// True if a decomposition was rejected for a cycle.
    pub has_circular_deps: bool,
    /// The rejected cycle.
    pub cycle_path: Vec<String>,
    last_seen: u64,
}

impl RuleMetrics {
    fn new(rule: &Arc<str>, buckets: usize) -> Self {
        Self {
            rule: Arc::clone(rule),
            histogram: vec![0; buckets],
            ..Self::default()
        }
    }

    /// Mean evaluation time.
    #[must_use]
    pub fn avg_time(&self) -> Duration {
        u32::try_from(self.evaluations)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.total_time / n)
    }

    /// Fraction of atomic step lookups served from the cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Totals across every tracked rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricTotals {
    /// Rules tracked.
    pub rules: usize,
    /// Activations.
    pub activations: u64,
    /// Evaluations.
    pub evaluations: u64,
    /// Successful evaluations.
    pub successful: u64,
    /// Failed evaluations.
    pub failed: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Rules flagged with circular decompositions.
    pub circular_rules: usize,
}

/// A point-in-time report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSummary {
    /// Totals.
    pub totals: MetricTotals,
    /// Median evaluation time, in µs (bucket bound).
    pub p50_us: u64,
    /// 95th percentile, in µs (bucket bound).
    pub p95_us: u64,
    /// 99th percentile, in µs (bucket bound).
    pub p99_us: u64,
    /// Global cache hit rate.
    pub cache_hit_rate: f64,
    /// Up to five slowest rules by mean time.
    pub slowest: Vec<(Arc<str>, Duration)>,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "rules: {}  activations: {}", t.rules, t.activations)?;
        writeln!(
            f,
            "evaluations: {} ({} ok, {} failed)  p50/p95/p99: {}/{}/{} µs",
            t.evaluations, t.successful, t.failed, self.p50_us, self.p95_us, self.p99_us
        )?;
        writeln!(
            f,
            "cache: {} hits, {} misses ({:.1}%)",
            t.cache_hits,
            t.cache_misses,
            self.cache_hit_rate * 100.0
        )?;
        if t.circular_rules > 0 {
            writeln!(f, "rules with circular decompositions: {}", t.circular_rules)?;
        }
        for (rule, avg) in &self.slowest {
            writeln!(f, "  {rule}: {avg:?} avg")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    rules: HashMap<Arc<str>, RuleMetrics>,
    clock: u64,
}

/// Collector shared by the network.
#[derive(Debug)]
pub struct DecompositionMetrics {
    config: MetricsConfig,
    inner: Mutex<Inner>,
}

impl DecompositionMetrics {
    /// Creates a collector.
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns true if recording is on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn with_rule(&self, rule: &Arc<str>, f: impl FnOnce(&mut RuleMetrics)) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let now = inner.clock;
        if !inner.rules.contains_key(rule) && inner.rules.len() >= self.config.max_tracked_rules.max(1) {
            let stalest = inner
                .rules
                .values()
                .min_by_key(|m| m.last_seen)
                .map(|m| Arc::clone(&m.rule));
            if let Some(stalest) = stalest {
                inner.rules.remove(&stalest);
            }
        }
        let buckets = self.config.histogram_buckets_us.len();
        let metrics = inner
            .rules
            .entry(Arc::clone(rule))
            .or_insert_with(|| RuleMetrics::new(rule, buckets));
        metrics.last_seen = now;
        f(metrics);
    }

    /// Records the shape of a rule's decomposed conditions.
    pub fn record_structure(&self, rule: &Arc<str>, chains: &[&DecomposedChain]) {
        self.with_rule(rule, |m| {
            m.chain_length = chains.iter().map(|c| c.chain_length()).sum();
            m.atomic_steps = chains.iter().map(|c| c.atomic_steps()).sum();
            m.comparison_steps = chains.iter().map(|c| c.comparison_steps()).sum();
            m.max_dependency_depth = chains
                .iter()
                .map(|c| c.max_dependency_depth())
                .max()
                .unwrap_or(0);
        });
    }

    /// Flags a rule whose decomposition was rejected for a cycle.
    pub fn record_circular(&self, rule: &Arc<str>, path: &[String]) {
        self.with_rule(rule, |m| {
            m.has_circular_deps = true;
            m.cycle_path = path.to_vec();
        });
    }

    /// Records one alpha evaluation.
    pub fn record_evaluation(&self, rule: &Arc<str>, elapsed: Duration, ok: bool) {
        let bucket = self.bucket_of(elapsed);
        let histograms = self.config.collect_histograms;
        self.with_rule(rule, |m| {
            m.evaluations += 1;
            if ok {
                m.successful += 1;
            } else {
                m.failed += 1;
            }
            m.total_time += elapsed;
            m.min_time = Some(m.min_time.map_or(elapsed, |t| t.min(elapsed)));
            m.max_time = m.max_time.max(elapsed);
            if histograms {
                if let Some(slot) = m.histogram.get_mut(bucket) {
                    *slot += 1;
                }
            }
        });
    }

    /// Records an atomic step cache lookup.
    pub fn record_cache(&self, rule: &Arc<str>, hit: bool) {
        self.with_rule(rule, |m| {
            if hit {
                m.cache_hits += 1;
            } else {
                m.cache_misses += 1;
            }
        });
    }

    /// Records a rule firing.
    pub fn record_activation(&self, rule: &Arc<str>) {
        self.with_rule(rule, |m| m.activations += 1);
    }

    /// Index of the first bucket bound at or above `elapsed`, else the last bucket.
    fn bucket_of(&self, elapsed: Duration) -> usize {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let buckets = &self.config.histogram_buckets_us;
        buckets
            .iter()
            .position(|b| us <= *b)
            .unwrap_or_else(|| buckets.len().saturating_sub(1))
    }

    /// Returns a rule's metrics.
    #[must_use]
    pub fn rule(&self, rule: &str) -> Option<RuleMetrics> {
        self.inner.lock().rules.get(rule).cloned()
    }

    /// Forgets a rule.
    pub fn remove_rule(&self, rule: &str) {
        self.inner.lock().rules.remove(rule);
    }

    /// Forgets everything.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }

    /// The `k` rules with the highest mean evaluation time.
    #[must_use]
    pub fn slowest_rules(&self, k: usize) -> Vec<RuleMetrics> {
        let mut all: Vec<RuleMetrics> = self.inner.lock().rules.values().cloned().collect();
        all.sort_by(|a, b| b.avg_time().cmp(&a.avg_time()).then_with(|| a.rule.cmp(&b.rule)));
        all.truncate(k);
        all
    }

    /// The `k` rules with the most evaluations.
    #[must_use]
    pub fn top_rules_by_evaluations(&self, k: usize) -> Vec<RuleMetrics> {
        let mut all: Vec<RuleMetrics> = self.inner.lock().rules.values().cloned().collect();
        all.sort_by(|a, b| b.evaluations.cmp(&a.evaluations).then_with(|| a.rule.cmp(&b.rule)));
        all.truncate(k);
        all
    }

    /// Totals across tracked rules.
    #[must_use]
    pub fn totals(&self) -> MetricTotals {
        let inner = self.inner.lock();
        inner.rules.values().fold(
            MetricTotals {
                rules: inner.rules.len(),
                ..MetricTotals::default()
            },
            |mut t, m| {
                t.activations += m.activations;
                t.evaluations += m.evaluations;
                t.successful += m.successful;
                t.failed += m.failed;
                t.cache_hits += m.cache_hits;
                t.cache_misses += m.cache_misses;
                t.circular_rules += usize::from(m.has_circular_deps);
                t
            },
        )
    }

    /// Evaluation-time percentile `p` (0 to 100), as a histogram bucket bound in µs.
    #[must_use]
    pub fn percentile(&self, p: u64) -> u64 {
        let buckets = &self.config.histogram_buckets_us;
        let mut counts = vec![0u64; buckets.len()];
        for m in self.inner.lock().rules.values() {
            for (slot, n) in counts.iter_mut().zip(&m.histogram) {
                *slot += n;
            }
        }
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }
        let target = (total * p.min(100) / 100).min(total - 1);
        let mut seen = 0;
        for (bound, n) in buckets.iter().zip(&counts) {
            seen += n;
            if seen > target {
                return *bound;
            }
        }
        buckets.last().copied().unwrap_or(0)
    }

    /// Builds a report.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let totals = self.totals();
        let lookups = totals.cache_hits + totals.cache_misses;
        #[allow(clippy::cast_precision_loss)]
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            totals.cache_hits as f64 / lookups as f64
        };
        MetricsSummary {
            totals,
            p50_us: self.percentile(50),
            p95_us: self.percentile(95),
            p99_us: self.percentile(99),
            cache_hit_rate,
            slowest: self
                .slowest_rules(5)
                .into_iter()
                .map(|m| {
                    let avg = m.avg_time();
                    (m.rule, avg)
                })
                .collect(),
        }
    }
}
