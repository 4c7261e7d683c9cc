//! Fixed-point amount conversion.
//!
//! On-chain amounts are integers scaled by a token's decimal precision
//! (18 for native value, 6 for the reward token). Conversion from a decimal
//! string is exact up to that precision; excess digits are **truncated**,
//! never rounded, so an authorization can never carry more value than the
//! caller asked for.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::constants::MAX_DECIMALS;
use crate::{PaygateError, Result, U256};

fn invalid(reason: impl Into<String>) -> PaygateError {
    PaygateError::InvalidAmount {
        reason: reason.into(),
    }
}

/// Parse a non-negative decimal string into a fixed-point integer.
///
/// Accepts `"12"`, `"12.5"`, `"0.000001"` and `".5"`. Rejects signs,
/// exponents, whitespace inside the number, and values that overflow `u256`.
pub fn to_fixed_point(value: &str, decimals: u8) -> Result<U256> {
    if decimals > MAX_DECIMALS {
        return Err(invalid(format!("precision {decimals} exceeds {MAX_DECIMALS}")));
    }
    let value = value.trim();
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid(format!("'{value}' is not a number")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid(format!("'{value}' is not a plain decimal")));
    }

    let keep = usize::from(decimals);
    let mut digits = String::with_capacity(int_part.len() + keep);
    digits.push_str(int_part);
    if frac_part.len() > keep {
        digits.push_str(&frac_part[..keep]);
    } else {
        digits.push_str(frac_part);
        digits.extend(std::iter::repeat_n('0', keep - frac_part.len()));
    }

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|e| invalid(format!("'{value}' out of range: {e}")))
}

/// Render a fixed-point integer as a decimal string without trailing zeros.
#[must_use]
pub fn from_fixed_point(value: U256, decimals: u8) -> String {
    let raw = value.to_string();
    let scale = usize::from(decimals);
    if scale == 0 {
        return raw;
    }
    let padded = if raw.len() <= scale {
        format!("{}{raw}", "0".repeat(scale + 1 - raw.len()))
    } else {
        raw
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Convert a game-currency amount into fixed point, truncating excess precision.
pub fn decimal_to_fixed_point(value: Decimal, decimals: u8) -> Result<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid(format!("{value} is negative")));
    }
    to_fixed_point(&value.normalize().to_string(), decimals)
}

/// Convert a fixed-point integer back into a game-currency amount.
///
/// Fails if the value does not fit `Decimal`'s 96-bit mantissa.
pub fn fixed_point_to_decimal(value: U256, decimals: u8) -> Result<Decimal> {
    let rendered = from_fixed_point(value, decimals);
    Decimal::from_str(&rendered)
        .map_err(|e| invalid(format!("{rendered} does not fit a decimal: {e}")))
}

/// Largest amount representable in `decimals` precision that does not exceed
/// `value`: what the ledger will actually move for `value`.
pub fn truncate_decimal(value: Decimal, decimals: u8) -> Result<Decimal> {
    fixed_point_to_decimal(decimal_to_fixed_point(value, decimals)?, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{NATIVE_DECIMALS, REWARD_TOKEN_DECIMALS};

    fn u(v: u128) -> U256 {
        U256::from(v)
    }

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(to_fixed_point("1", 6).unwrap(), u(1_000_000));
        assert_eq!(to_fixed_point("1.5", 6).unwrap(), u(1_500_000));
        assert_eq!(to_fixed_point("0.000001", 6).unwrap(), u(1));
        assert_eq!(to_fixed_point(".25", 2).unwrap(), u(25));
        assert_eq!(to_fixed_point("7.", 2).unwrap(), u(700));
        assert_eq!(to_fixed_point("0", 18).unwrap(), U256::ZERO);
        assert_eq!(
            to_fixed_point("0.05", NATIVE_DECIMALS).unwrap(),
            u(50_000_000_000_000_000)
        );
    }

    #[test]
    fn excess_precision_truncates_instead_of_rounding() {
        assert_eq!(to_fixed_point("1.9999999", 6).unwrap(), u(1_999_999));
        assert_eq!(to_fixed_point("0.0000009", 6).unwrap(), U256::ZERO);
        assert_eq!(
            decimal_to_fixed_point(Decimal::from_str("2.1234567").unwrap(), 6).unwrap(),
            u(2_123_456)
        );
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", ".", "-1", "+1", "1e5", "1.2.3", "abc", "1 000"] {
            assert!(to_fixed_point(bad, 6).is_err(), "accepted {bad:?}");
        }
        assert!(to_fixed_point("1", 78).is_err());
    }

    #[test]
    fn rejects_overflow() {
        let huge = "1".repeat(80);
        assert!(to_fixed_point(&huge, 0).is_err());
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(from_fixed_point(u(1_500_000), 6), "1.5");
        assert_eq!(from_fixed_point(u(1), 6), "0.000001");
        assert_eq!(from_fixed_point(u(2_000_000), 6), "2");
        assert_eq!(from_fixed_point(U256::ZERO, 6), "0");
        assert_eq!(from_fixed_point(u(42), 0), "42");
    }

    #[test]
    fn round_trip_for_supported_precisions() {
        let samples = [
            0u128,
            1,
            9,
            10,
            999_999,
            1_000_000,
            123_456_789,
            1_000_000_000_000_000_000,
            340_282_366_920_938_463_463_374_607_431_768_211_455,
        ];
        for decimals in [REWARD_TOKEN_DECIMALS, NATIVE_DECIMALS] {
            for &raw in &samples {
                let x = u(raw);
                let back = to_fixed_point(&from_fixed_point(x, decimals), decimals).unwrap();
                assert_eq!(back, x, "decimals={decimals} raw={raw}");
            }
        }
        let max = U256::MAX;
        assert_eq!(to_fixed_point(&from_fixed_point(max, 18), 18).unwrap(), max);
    }

    #[test]
    fn decimal_conversions() {
        let amount = Decimal::new(100, 0);
        let fixed = decimal_to_fixed_point(amount, 6).unwrap();
        assert_eq!(fixed, u(100_000_000));
        assert_eq!(fixed_point_to_decimal(fixed, 6).unwrap(), amount);
        assert!(decimal_to_fixed_point(Decimal::new(-1, 0), 6).is_err());
        assert_eq!(
            truncate_decimal(Decimal::from_str("3.14159265").unwrap(), 6).unwrap(),
            Decimal::from_str("3.141592").unwrap()
        );
    }

    #[test]
    fn decimal_overflow_is_an_error() {
        assert!(fixed_point_to_decimal(U256::MAX, 6).is_err());
    }
}
