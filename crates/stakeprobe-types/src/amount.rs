//! Fixed-point amount handling.
//!
//! Human amounts (e.g. `3` tokens) are compared with on-chain values after
//! scaling to base units: `round(amount * 10^18)`. Every reconciliation check
//! goes through [`to_base_units`].

use serde_json::Value;

/// Base units per whole token.
pub const BASE_UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

const SCALE: f64 = 1e18;

/// Scale a human-readable amount to base units, rounding to the nearest unit.
///
/// Negative and non-finite amounts map to zero.
pub fn to_base_units(amount: f64) -> u128 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * SCALE).round() as u128
}

/// Read an on-chain amount in base units from a JSON value.
///
/// The node reports amounts as JSON integers. Integers beyond `u64` are
/// parsed by `serde_json` as floats, so those are rounded back to the nearest
/// base unit. Decimal strings are accepted as well.
pub fn base_units_from_json(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(v as u128)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.round() as u128)
            }
        }
        Value::String(s) => parse_base_units(s),
        _ => None,
    }
}

fn parse_base_units(s: &str) -> Option<u128> {
    let s = s.trim();
    if let Ok(v) = s.parse::<u128>() {
        return Some(v);
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f.round() as u128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scale_whole_tokens() {
        assert_eq!(to_base_units(3.0), 3_000_000_000_000_000_000);
        assert_eq!(to_base_units(8.0), 8 * BASE_UNITS_PER_TOKEN);
        assert_eq!(to_base_units(1.0), BASE_UNITS_PER_TOKEN);
    }

    #[test]
    fn test_scale_rounds_to_nearest() {
        assert_eq!(to_base_units(1e-18), 1);
        assert_eq!(to_base_units(0.4e-18), 0);
        assert_eq!(to_base_units(0.5), 500_000_000_000_000_000);
    }

    #[test]
    fn test_scale_rejects_negative_and_nan() {
        assert_eq!(to_base_units(-1.0), 0);
        assert_eq!(to_base_units(f64::NAN), 0);
    }

    #[test]
    fn test_base_units_from_json() {
        assert_eq!(
            base_units_from_json(&json!(8000000000000000000u64)),
            Some(8 * BASE_UNITS_PER_TOKEN)
        );
        // Beyond u64::MAX serde_json falls back to f64.
        let big: Value = serde_json::from_str("30000000000000000000").unwrap();
        assert_eq!(base_units_from_json(&big), Some(30 * BASE_UNITS_PER_TOKEN));
        assert_eq!(
            base_units_from_json(&json!("1000000000000000000")),
            Some(BASE_UNITS_PER_TOKEN)
        );
        assert_eq!(base_units_from_json(&json!(null)), None);
        assert_eq!(base_units_from_json(&json!(-5)), None);
    }
}
