//! Compiled-pattern cache for `LIKE` and `MATCHES`.
//!
//! Rule conditions compare against the same few literal patterns millions of
//! times, so compiled [`Regex`] values are kept in a small LRU keyed on the
//! pattern text and its dialect.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use trellis_foundation::{Error, Result};

/// Default number of compiled patterns kept.
pub const DEFAULT_PATTERN_CACHE_SIZE: usize = 256;

/// Pattern dialect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQL wildcards: `%` is any run, `_` is any single character.
    Like,
    /// Raw regular expression, unanchored.
    Regex,
}

/// Translates a SQL `LIKE` pattern into an anchored regular expression.
///
/// ```
/// use trellis_language::pattern::like_to_regex;
///
/// assert_eq!(like_to_regex("%world"), "^.*world$");
/// assert_eq!(like_to_regex("a_c.d"), r"^a.c\.d$");
/// ```
#[must_use]
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    out.push('$');
    out
}

/// An LRU of compiled patterns.
pub struct PatternCache {
    cache: Mutex<LruCache<(Dialect, String), Arc<Regex>>>,
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("len", &self.cache.lock().len())
            .finish()
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN_CACHE_SIZE)
    }
}

impl PatternCache {
    /// Creates a cache holding at most `capacity` patterns (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the compiled form of a pattern, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`trellis_foundation::ErrorKind::MalformedAst`] if the pattern is
    /// not a valid regular expression.
    pub fn compile(&self, dialect: Dialect, pattern: &str) -> Result<Arc<Regex>> {
        let key = (dialect, pattern.to_string());
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let source = match dialect {
            Dialect::Like => like_to_regex(pattern),
            Dialect::Regex => pattern.to_string(),
        };
        let compiled = Arc::new(
            Regex::new(&source)
                .map_err(|e| Error::malformed(format!("invalid pattern {pattern:?}: {e}")))?,
        );
        self.cache.lock().put(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Tests `text` against a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn is_match(&self, dialect: Dialect, pattern: &str, text: &str) -> Result<bool> {
        Ok(self.compile(dialect, pattern)?.is_match(text))
    }

    /// Returns the number of cached patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
