//! Sample values and the numeric coercion rules applied to them.
//!
//! Telemetry values arrive either as numbers or as strings. Aggregation works
//! on numbers, so strings are coerced with the same rules a browser applies to
//! `Number(v)` and `parseFloat(v)`:
//!
//! - [`DataValue::to_number`] -- whole-string conversion; `NaN` when the string is not a number.
//! - [`DataValue::is_numeric`] -- true when both conversions produce finite numbers.
//! - [`DataValue::converted`] -- numeric-looking values become numbers, everything else passes through.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("valid decimal pattern")
});

static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)")
        .expect("valid float prefix pattern")
});

static RADIX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0(?:[xX](?P<hex>[0-9a-fA-F]+)|[oO](?P<oct>[0-7]+)|[bB](?P<bin>[01]+))$")
        .expect("valid radix pattern")
});

/// A telemetry value: a number or an arbitrary string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Number(f64),
    Text(String),
}

impl DataValue {
    /// Numeric value with `Number(v)` semantics. Never fails; unparseable text is `NaN`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            DataValue::Number(n) => *n,
            DataValue::Text(s) => js_number(s),
        }
    }

    /// `(v - parseFloat(v) + 1) >= 0`.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        match self {
            DataValue::Number(n) => n - n + 1.0 >= 0.0,
            DataValue::Text(s) => js_number(s) - parse_float(s) + 1.0 >= 0.0,
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            DataValue::Number(n) => *n != 0.0 && !n.is_nan(),
            DataValue::Text(s) => !s.is_empty(),
        }
    }

    /// Delivery-side conversion: truthy numeric values become numbers, others are kept as-is.
    #[must_use]
    pub fn converted(&self) -> DataValue {
        if self.is_truthy() && self.is_numeric() {
            DataValue::Number(self.to_number())
        } else {
            self.clone()
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            DataValue::Text(_) => None,
        }
    }
}

impl Default for DataValue {
    fn default() -> Self {
        DataValue::Number(0.0)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Number(n) => write!(f, "{n}"),
            DataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Number(v)
    }
}

impl From<i64> for DataValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: i64) -> Self {
        DataValue::Number(v as f64)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Number(f64::from(v))
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

/// Whole-string numeric conversion.
fn js_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if DECIMAL.is_match(t) {
        return t.parse::<f64>().unwrap_or(f64::NAN);
    }
    if let Some(caps) = RADIX_LITERAL.captures(t) {
        let (digits, radix) = if let Some(m) = caps.name("hex") {
            (m.as_str(), 16)
        } else if let Some(m) = caps.name("oct") {
            (m.as_str(), 8)
        } else if let Some(m) = caps.name("bin") {
            (m.as_str(), 2)
        } else {
            return f64::NAN;
        };
        return digits
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    }
    f64::NAN
}

/// Longest numeric prefix after leading whitespace.
fn parse_float(s: &str) -> f64 {
    let t = s.trim_start();
    let Some(m) = FLOAT_PREFIX.find(t) else {
        return f64::NAN;
    };
    let lit = m.as_str();
    match lit.trim_start_matches(['+', '-']) {
        "Infinity" if lit.starts_with('-') => f64::NEG_INFINITY,
        "Infinity" => f64::INFINITY,
        _ => lit.parse::<f64>().unwrap_or(f64::NAN),
    }
}
