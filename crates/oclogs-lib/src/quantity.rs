//! Resource quantity parsing
//!
//! Converts the orchestrator's textual quantities into plain numbers:
//! - memory-style quantities (`"256Mi"`, `"1500M"`, `"2Gi"`) into bytes
//! - cpu-style quantities (`"500m"`, `"2"`) into cores

use thiserror::Error;

/// Errors raised while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),
}

/// Parse a memory-style quantity into bytes.
///
/// A trailing `i` selects binary multiples (`Ki`, `Mi`, `Gi` = 2^10, 2^20, 2^30),
/// otherwise the suffix letter selects decimal multiples (`k`, `M`, `G` = 10^3,
/// 10^6, 10^9). The suffix letter is case-insensitive. Without a suffix the
/// whole string must be a plain integer.
pub fn bytes(qty: &str) -> Result<u64, QuantityError> {
    let qty = qty.trim();
    if qty.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (body, binary) = match qty.strip_suffix('i') {
        Some(rest) => (rest, true),
        None => (qty, false),
    };

    let Some(unit) = body.chars().last() else {
        return Err(QuantityError::Invalid(qty.to_string()));
    };

    let exponent = match (unit.to_ascii_lowercase(), binary) {
        ('k', true) => 10,
        ('m', true) => 20,
        ('g', true) => 30,
        ('k', false) => 3,
        ('m', false) => 6,
        ('g', false) => 9,
        _ => {
            // "5i" has a dangling binary marker with no unit letter
            if binary {
                return Err(QuantityError::Invalid(qty.to_string()));
            }
            return parse_integer(qty, qty);
        }
    };

    let value = parse_integer(&body[..body.len() - unit.len_utf8()], qty)?;
    let base: u64 = if binary { 2 } else { 10 };

    base.checked_pow(exponent)
        .and_then(|multiplier| value.checked_mul(multiplier))
        .ok_or_else(|| QuantityError::Invalid(qty.to_string()))
}

/// Parse a cpu-style quantity into cores.
///
/// A trailing `m` means millicores; anything else is a (possibly fractional)
/// number of whole cores.
pub fn cores(qty: &str) -> Result<f64, QuantityError> {
    let qty = qty.trim();
    if qty.is_empty() {
        return Err(QuantityError::Empty);
    }

    match qty.strip_suffix('m') {
        Some(millis) => Ok(parse_float(millis, qty)? / 1000.0),
        None => parse_float(qty, qty),
    }
}

fn parse_integer(digits: &str, original: &str) -> Result<u64, QuantityError> {
    digits
        .parse::<u64>()
        .map_err(|_| QuantityError::Invalid(original.to_string()))
}

fn parse_float(digits: &str, original: &str) -> Result<f64, QuantityError> {
    let value = digits
        .parse::<f64>()
        .map_err(|_| QuantityError::Invalid(original.to_string()))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(QuantityError::Invalid(original.to_string()))
    }
}
