//! Operators, cast targets, and built-in function names.
//!
//! Operator strings reach the engine either raw (`"+"`) or Base64-encoded
//! (`"Kw=="`) depending on the parser build. [`decode_operator`] collapses both
//! spellings at ingest so everything downstream sees one canonical form.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use trellis_foundation::{Error, ErrorKind, Result};

const KNOWN_OPERATORS: &[&str] = &[
    "+", "-", "*", "/", "%", "==", "!=", "<", "<=", ">", ">=", "=", "<>", "CONTAINS", "IN",
    "LIKE", "MATCHES", "AND", "OR", "NOT",
];

/// Returns the canonical spelling of an operator string.
///
/// Base64 spellings of known operators are decoded; everything else is returned
/// unchanged. The function is idempotent.
#[must_use]
pub fn decode_operator(raw: &str) -> String {
    if KNOWN_OPERATORS.contains(&raw) {
        return raw.to_string();
    }
    if let Ok(bytes) = STANDARD.decode(raw) {
        if let Ok(decoded) = String::from_utf8(bytes) {
            if KNOWN_OPERATORS.contains(&decoded.as_str()) {
                return decoded;
            }
        }
    }
    raw.to_string()
}

/// Binary operators over two expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// `+` (addition or string concatenation)
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%` (integer modulo)
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// Substring containment.
    Contains,
    /// Membership in an array.
    In,
    /// SQL wildcard match.
    Like,
    /// Regular-expression match.
    Matches,
}

impl BinaryOp {
    /// Parses an operator, accepting Base64 spellings.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnsupportedOperator`] for unknown operators.
    pub fn parse(raw: &str) -> Result<Self> {
        let canonical = decode_operator(raw);
        Ok(match canonical.to_ascii_uppercase().as_str() {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "==" | "=" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "CONTAINS" => Self::Contains,
            "IN" => Self::In,
            "LIKE" => Self::Like,
            "MATCHES" => Self::Matches,
            _ => return Err(Error::new(ErrorKind::UnsupportedOperator(canonical))),
        })
    }

    /// Returns the canonical symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
            Self::Like => "LIKE",
            Self::Matches => "MATCHES",
        }
    }

    /// Returns true for value-producing arithmetic operators.
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    /// Returns true for operators producing a boolean.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        !self.is_arithmetic()
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Logical connectives in a `logicalExpression`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogicalOp {
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
}

impl LogicalOp {
    /// Parses `AND`/`OR` (any case, `&&`/`||` too), accepting Base64 spellings.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnsupportedOperator`] for anything else.
    pub fn parse(raw: &str) -> Result<Self> {
        let canonical = decode_operator(raw);
        match canonical.to_ascii_uppercase().as_str() {
            "AND" | "&&" => Ok(Self::And),
            "OR" | "||" => Ok(Self::Or),
            _ => Err(Error::new(ErrorKind::UnsupportedOperator(canonical))),
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// Target of a `cast` expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CastType {
    /// Cast to number.
    Number,
    /// Cast to string.
    String,
    /// Cast to bool.
    Bool,
}

impl CastType {
    /// Parses a cast target name.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedAst`] for unknown targets.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "bool" | "boolean" => Ok(Self::Bool),
            other => Err(Error::malformed(format!("unknown cast type '{other}'"))),
        }
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Bool => f.write_str("bool"),
        }
    }
}

/// Built-in functions available in expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Function {
    /// String (or array) length.
    Length,
    /// Uppercase a string.
    Upper,
    /// Lowercase a string.
    Lower,
    /// Absolute value.
    Abs,
    /// Round half away from zero.
    Round,
    /// Round down.
    Floor,
    /// Round up.
    Ceil,
    /// `SUBSTRING(s, start[, length])`, zero-based and character-indexed.
    /// Out-of-range offsets clamp to an empty or shorter result.
    Substring,
    /// Strip surrounding whitespace.
    Trim,
}

impl Function {
    /// Parses a function name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownFunction`] for names outside the built-in set.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name.to_ascii_uppercase().as_str() {
            "LENGTH" => Self::Length,
            "UPPER" => Self::Upper,
            "LOWER" => Self::Lower,
            "ABS" => Self::Abs,
            "ROUND" => Self::Round,
            "FLOOR" => Self::Floor,
            "CEIL" => Self::Ceil,
            "SUBSTRING" => Self::Substring,
            "TRIM" => Self::Trim,
            _ => return Err(Error::new(ErrorKind::UnknownFunction(name.to_string()))),
        })
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Length => "LENGTH",
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Abs => "ABS",
            Self::Round => "ROUND",
            Self::Floor => "FLOOR",
            Self::Ceil => "CEIL",
            Self::Substring => "SUBSTRING",
            Self::Trim => "TRIM",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
