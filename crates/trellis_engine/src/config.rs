//! Engine configuration.
//!
//! Every knob lives in a plain struct with a `Default`, a few presets, `with_*`
//! builders, and a `validate()` that rejects inconsistent settings before a
//! network is built from them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use trellis_foundation::{Error, ErrorKind, Result};

use crate::transaction::TransactionOptions;

/// Largest accepted hash cache.
pub const MAX_HASH_CACHE_SIZE: usize = 1_000_000;
/// Largest accepted connection cache.
pub const MAX_CONNECTION_CACHE_SIZE: usize = 10_000_000;
/// Largest accepted number of retained chain details.
pub const MAX_CHAIN_DETAILS: usize = 100_000;
/// Default kill switch for activations fired by a single commit.
pub const DEFAULT_MAX_ACTIVATIONS: usize = 10_000;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidConfig(message.into()))
}

// =============================================================================
// Eviction Policy
// =============================================================================

/// Cache eviction strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvictionPolicy {
    /// Never evict; inserts beyond capacity are dropped.
    None,
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used.
    Lfu,
}

impl EvictionPolicy {
    /// Returns the lowercase policy name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lru => "lru",
            Self::Lfu => "lfu",
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            other => Err(invalid(format!("unknown eviction policy: {other}"))),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Settings shared by every bounded cache.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheSettings {
    /// Whether the cache is consulted at all.
    pub enabled: bool,
    /// Maximum number of entries.
    pub max_size: usize,
    /// What to evict once full.
    pub eviction: EvictionPolicy,
    /// Entry lifetime; `None` never expires.
    pub ttl: Option<Duration>,
}

impl CacheSettings {
    /// An enabled LRU cache of `max_size` entries without expiry.
    #[must_use]
    pub const fn lru(max_size: usize) -> Self {
        Self {
            enabled: true,
            max_size,
            eviction: EvictionPolicy::Lru,
            ttl: None,
        }
    }

    /// A disabled cache.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_size: 0,
            eviction: EvictionPolicy::None,
            ttl: None,
        }
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn validate(&self, name: &str, max: usize) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_size == 0 {
            return Err(invalid(format!(
                "{name}_max_size must be > 0 when the cache is enabled"
            )));
        }
        if self.max_size > max {
            return Err(invalid(format!(
                "{name}_max_size too large: {} (max: {max})",
                self.max_size
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Chain Performance
// =============================================================================

/// Tuning for alpha chains, beta chains, and their caches.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainPerformanceConfig {
    /// Node signature cache.
    pub hash_cache: CacheSettings,
    /// Parent-child connection cache.
    pub connection_cache: CacheSettings,
    /// Whether chain metrics are collected.
    pub metrics_enabled: bool,
    /// Whether per-chain details are retained.
    pub metrics_detailed_chains: bool,
    /// How many chain details are retained.
    pub metrics_max_chain_details: usize,
    /// Reserved. Accepted and serialized so configurations written for a
    /// parallel signature builder still load; signatures are always computed
    /// on the committing thread.
    pub parallel_hash_computation: bool,
    /// Prefix for exported metric names; `None` disables export naming.
    pub metrics_prefix: Option<String>,
    /// Beta-chain prefix cache.
    pub beta_hash_cache: CacheSettings,
    /// Reserved. Validated like the other caches but never allocated: join
    /// outputs already live in the join nodes' memories. It adds nothing to
    /// [`ChainPerformanceConfig::estimate_memory_usage`].
    pub join_result_cache: CacheSettings,
}

impl Default for ChainPerformanceConfig {
    fn default() -> Self {
        Self {
            hash_cache: CacheSettings::lru(10_000),
            connection_cache: CacheSettings::lru(50_000),
            metrics_enabled: true,
            metrics_detailed_chains: true,
            metrics_max_chain_details: 1_000,
            parallel_hash_computation: false,
            metrics_prefix: None,
            beta_hash_cache: CacheSettings::lru(10_000),
            join_result_cache: CacheSettings::lru(5_000).with_ttl(Duration::from_secs(60)),
        }
    }
}

impl ChainPerformanceConfig {
    /// Large caches, no detailed chain metrics.
    #[must_use]
    pub fn high_performance() -> Self {
        Self {
            hash_cache: CacheSettings::lru(100_000),
            connection_cache: CacheSettings::lru(200_000),
            metrics_enabled: true,
            metrics_detailed_chains: false,
            metrics_max_chain_details: 0,
            parallel_hash_computation: false,
            metrics_prefix: None,
            beta_hash_cache: CacheSettings::lru(100_000),
            join_result_cache: CacheSettings::lru(50_000).with_ttl(Duration::from_secs(300)),
        }
    }

    /// Small expiring caches, no join result cache.
    #[must_use]
    pub fn low_memory() -> Self {
        let five_minutes = Duration::from_secs(300);
        Self {
            hash_cache: CacheSettings::lru(1_000).with_ttl(five_minutes),
            connection_cache: CacheSettings::lru(5_000).with_ttl(five_minutes),
            metrics_enabled: true,
            metrics_detailed_chains: false,
            metrics_max_chain_details: 0,
            parallel_hash_computation: false,
            metrics_prefix: None,
            beta_hash_cache: CacheSettings::lru(1_000),
            join_result_cache: CacheSettings::disabled(),
        }
    }

    /// Every cache off; metrics stay on.
    #[must_use]
    pub fn disabled_caches() -> Self {
        Self {
            hash_cache: CacheSettings::disabled(),
            connection_cache: CacheSettings::disabled(),
            beta_hash_cache: CacheSettings::disabled(),
            join_result_cache: CacheSettings::disabled(),
            ..Self::default()
        }
    }

    /// Sets the metric name prefix.
    #[must_use]
    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = Some(prefix.into());
        self
    }

    /// Checks sizes, limits, and the prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        self.hash_cache.validate("hash_cache", MAX_HASH_CACHE_SIZE)?;
        self.connection_cache
            .validate("connection_cache", MAX_CONNECTION_CACHE_SIZE)?;
        if self.metrics_enabled
            && self.metrics_detailed_chains
            && self.metrics_max_chain_details > MAX_CHAIN_DETAILS
        {
            return Err(invalid(format!(
                "metrics_max_chain_details too large: {} (max: {MAX_CHAIN_DETAILS})",
                self.metrics_max_chain_details
            )));
        }
        if self.metrics_prefix.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("metrics_prefix cannot be empty when set"));
        }
        self.beta_hash_cache.validate("beta_hash_cache", usize::MAX)?;
        self.join_result_cache
            .validate("join_result_cache", usize::MAX)?;
        Ok(())
    }

    /// Rough upper bound, in bytes, of what the configured caches can hold.
    #[must_use]
    pub fn estimate_memory_usage(&self) -> usize {
        let mut total = 0usize;
        if self.hash_cache.enabled {
            total = total.saturating_add(self.hash_cache.max_size.saturating_mul(500));
        }
        if self.connection_cache.enabled {
            total = total.saturating_add(self.connection_cache.max_size.saturating_mul(100));
        }
        if self.metrics_enabled && self.metrics_detailed_chains {
            total = total.saturating_add(self.metrics_max_chain_details.saturating_mul(200));
        }
        total
    }
}

impl fmt::Display for ChainPerformanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChainPerformanceConfig{{HashCache:{}({},{}), ConnCache:{}({},{}), Metrics:{}, Prefix:{}}}",
            self.hash_cache.enabled,
            self.hash_cache.max_size,
            self.hash_cache.eviction,
            self.connection_cache.enabled,
            self.connection_cache.max_size,
            self.connection_cache.eviction,
            self.metrics_enabled,
            self.metrics_prefix.as_deref().unwrap_or("-"),
        )
    }
}

// =============================================================================
// Arithmetic Cache
// =============================================================================

/// Settings for the shared arithmetic result cache.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArithmeticCacheConfig {
    /// Whether results are cached.
    pub enabled: bool,
    /// Maximum number of cached results.
    pub max_size: usize,
    /// Lifetime of a cached result.
    pub ttl: Duration,
}

impl Default for ArithmeticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1_000,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Settings for decomposition metrics.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsConfig {
    /// Master switch; nothing is recorded when false.
    pub enabled: bool,
    /// Whether evaluation latencies are bucketed.
    pub collect_histograms: bool,
    /// Upper bounds of the latency buckets, in microseconds, ascending.
    pub histogram_buckets_us: Vec<u64>,
    /// Rules tracked before the least recently seen one is dropped.
    pub max_tracked_rules: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_histograms: true,
            histogram_buckets_us: vec![1, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000],
            max_tracked_rules: 1_000,
        }
    }
}

impl MetricsConfig {
    /// Metrics switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Complete network configuration.
///
/// ```
/// use trellis_engine::config::{ChainPerformanceConfig, EngineConfig};
///
/// let config = EngineConfig::default()
///     .with_chain(ChainPerformanceConfig::low_memory())
///     .with_max_activations(500);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Chain and cache tuning.
    pub chain: ChainPerformanceConfig,
    /// Arithmetic result cache.
    pub arithmetic_cache: ArithmeticCacheConfig,
    /// Decomposition metrics.
    pub metrics: MetricsConfig,
    /// Defaults for new transactions.
    pub transactions: TransactionOptions,
    /// Kill switch: activations fired by one commit.
    pub max_activations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain: ChainPerformanceConfig::default(),
            arithmetic_cache: ArithmeticCacheConfig::default(),
            metrics: MetricsConfig::default(),
            transactions: TransactionOptions::default(),
            max_activations: DEFAULT_MAX_ACTIVATIONS,
        }
    }
}

impl EngineConfig {
    /// Sets the chain tuning.
    #[must_use]
    pub fn with_chain(mut self, chain: ChainPerformanceConfig) -> Self {
        self.chain = chain;
        self
    }

    /// Sets the arithmetic cache settings.
    #[must_use]
    pub const fn with_arithmetic_cache(mut self, cache: ArithmeticCacheConfig) -> Self {
        self.arithmetic_cache = cache;
        self
    }

    /// Sets the metrics settings.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the default transaction options.
    #[must_use]
    pub const fn with_transactions(mut self, options: TransactionOptions) -> Self {
        self.transactions = options;
        self
    }

    /// Sets the activation kill switch.
    #[must_use]
    pub const fn with_max_activations(mut self, max: usize) -> Self {
        self.max_activations = max;
        self
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] for the first invalid section.
    pub fn validate(&self) -> Result<()> {
        self.chain.validate()?;
        if self.arithmetic_cache.enabled && self.arithmetic_cache.max_size == 0 {
            return Err(invalid("arithmetic cache size must be > 0 when enabled"));
        }
        if !self
            .metrics
            .histogram_buckets_us
            .windows(2)
            .all(|w| w[0] < w[1])
        {
            return Err(invalid("histogram buckets must be strictly ascending"));
        }
        if self.max_activations == 0 {
            return Err(invalid("max_activations must be > 0"));
        }
        self.transactions.validate()
    }
}
