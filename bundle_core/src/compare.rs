//! Type-tolerant deep equality for drift detection.
//!
//! A declared spec and the observed state it produced rarely agree
//! structurally: JSON round-tripping widens integers to floats, and
//! timestamps come back re-encoded. Plain structural equality therefore
//! reports false drift; this comparator reconciles numeric and timestamp
//! encodings first and only then falls back to structure.

use chrono::DateTime;
use serde_json::Value;

/// CompareMode selects how timestamp-valued strings are compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareMode {
    /// Timestamps are compared as instants.
    #[default]
    Strict,
    /// Any two RFC 3339 strings compare equal regardless of instant. This
    /// supports dynamic fields such as `${now()}`.
    IgnoreTimestampValues,
}

/// Equal reports whether `a` and `b` denote the same value under `mode`.
///
/// Never fails; unknown combinations compare unequal.
pub fn equal(a: &Value, b: &Value, mode: CompareMode) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(tx), Ok(ty)) => mode == CompareMode::IgnoreTimestampValues || tx == ty,
                // Plain string equality was already decided structurally.
                _ => false,
            }
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, vx)| y.get(k).is_some_and(|vy| equal(vx, vy, mode)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(vx, vy)| equal(vx, vy, mode))
        }
        _ => match (as_double(a), as_double(b)) {
            (Some(x), Some(y)) => x.to_bits() == y.to_bits(),
            _ => false,
        },
    }
}

/// As_double coerces a value into double precision: any JSON number, or a
/// string spelling a decimal number.
fn as_double(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
