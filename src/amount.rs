//! Exact-precision token amounts
//!
//! Amounts cross three chains with different decimal conventions, so they are never held as
//! floating point. User-facing amounts travel as decimal strings ("units"); on-chain amounts are
//! integers in the token's smallest denomination ("raw").

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing or combining amounts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    #[error("Amount {amount} has more than {decimals} decimal places")]
    TooPrecise { amount: String, decimals: u32 },

    #[error("Amount overflow")]
    Overflow,

    #[error("Amount underflow")]
    Underflow,
}

/// Integer amount in the smallest denomination of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawAmount(u128);

impl RawAmount {
    pub const ZERO: RawAmount = RawAmount(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"100.25"` into raw units of a token with `decimals`
    pub fn from_units(units: &str, decimals: u32) -> Result<Self, AmountError> {
        let (integer, fraction) = split_decimal(units)?;
        if fraction.len() > decimals as usize {
            return Err(AmountError::TooPrecise {
                amount: units.to_string(),
                decimals,
            });
        }

        let scale = pow10(decimals)?;
        let integer: u128 = if integer.is_empty() {
            0
        } else {
            integer
                .parse()
                .map_err(|_| AmountError::InvalidAmount(units.to_string()))?
        };

        let mut padded = fraction.to_string();
        padded.extend(std::iter::repeat('0').take(decimals as usize - fraction.len()));
        let fraction: u128 = if padded.is_empty() {
            0
        } else {
            padded
                .parse()
                .map_err(|_| AmountError::InvalidAmount(units.to_string()))?
        };

        integer
            .checked_mul(scale)
            .and_then(|v| v.checked_add(fraction))
            .map(RawAmount)
            .ok_or(AmountError::Overflow)
    }

    /// Render as a decimal string with trailing zeros removed
    pub fn to_units(&self, decimals: u32) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let digits = format!("{:0>width$}", self.0, width = decimals as usize + 1);
        let (integer, fraction) = digits.split_at(digits.len() - decimals as usize);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            integer.to_string()
        } else {
            format!("{integer}.{fraction}")
        }
    }

    /// Convert between decimal conventions. Scaling down truncates.
    pub fn rescale(&self, from_decimals: u32, to_decimals: u32) -> Result<Self, AmountError> {
        if to_decimals >= from_decimals {
            let factor = pow10(to_decimals - from_decimals)?;
            self.0.checked_mul(factor).map(RawAmount).ok_or(AmountError::Overflow)
        } else {
            let factor = pow10(from_decimals - to_decimals)?;
            Ok(RawAmount(self.0 / factor))
        }
    }

    pub fn checked_add(&self, other: RawAmount) -> Result<Self, AmountError> {
        self.0.checked_add(other.0).map(RawAmount).ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(&self, other: RawAmount) -> Result<Self, AmountError> {
        self.0.checked_sub(other.0).map(RawAmount).ok_or(AmountError::Underflow)
    }

    pub fn saturating_sub(&self, other: RawAmount) -> Self {
        RawAmount(self.0.saturating_sub(other.0))
    }

    /// Reduce by `bps` basis points, rounding down
    pub fn less_bps(&self, bps: u32) -> Result<Self, AmountError> {
        let keep = 10_000u128.saturating_sub(u128::from(bps));
        self.0
            .checked_mul(keep)
            .map(|v| RawAmount(v / 10_000))
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RawAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>()
            .map(RawAmount)
            .map_err(|_| AmountError::InvalidAmount(s.to_string()))
    }
}

impl Serialize for RawAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Truncate a decimal string to exactly `places` fractional digits, never rounding up.
///
/// `"95.2379"` with two places becomes `"95.23"`, `"7"` becomes `"7.00"`.
pub fn truncate_units(units: &str, places: usize) -> Result<String, AmountError> {
    let (integer, fraction) = split_decimal(units)?;
    let integer = if integer.is_empty() { "0" } else { integer };
    let integer = integer.trim_start_matches('0');
    let integer = if integer.is_empty() { "0" } else { integer };
    if places == 0 {
        return Ok(integer.to_string());
    }
    let mut kept: String = fraction.chars().take(places).collect();
    while kept.len() < places {
        kept.push('0');
    }
    Ok(format!("{integer}.{kept}"))
}

/// Check that a string is a plain non-negative decimal
pub fn validate_units(units: &str) -> Result<(), AmountError> {
    split_decimal(units).map(|_| ())
}

fn split_decimal(units: &str) -> Result<(&str, &str), AmountError> {
    let trimmed = units.trim();
    if trimmed.is_empty() {
        return Err(AmountError::InvalidAmount(units.to_string()));
    }
    let (integer, fraction) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !digits_only(integer) || !digits_only(fraction) || (integer.is_empty() && fraction.is_empty())
    {
        return Err(AmountError::InvalidAmount(units.to_string()));
    }
    Ok((integer, fraction))
}

fn pow10(exp: u32) -> Result<u128, AmountError> {
    10u128.checked_pow(exp).ok_or(AmountError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_units_scales_by_decimals() {
        assert_eq!(RawAmount::from_units("100.00", 6).unwrap(), RawAmount::new(100_000_000));
        assert_eq!(RawAmount::from_units("0.1", 12).unwrap(), RawAmount::new(100_000_000_000));
        assert_eq!(RawAmount::from_units(".5", 1).unwrap(), RawAmount::new(5));
    }

    #[test]
    fn test_from_units_rejects_bad_input() {
        assert!(RawAmount::from_units("-1", 6).is_err());
        assert!(RawAmount::from_units("1e5", 6).is_err());
        assert!(RawAmount::from_units("", 6).is_err());
        assert!(RawAmount::from_units(".", 6).is_err());
        assert!(matches!(
            RawAmount::from_units("1.1234567", 6),
            Err(AmountError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_to_units_trims_trailing_zeros() {
        assert_eq!(RawAmount::new(95_230_000).to_units(6), "95.23");
        assert_eq!(RawAmount::new(5).to_units(7), "0.0000005");
        assert_eq!(RawAmount::new(2_000_000).to_units(6), "2");
    }

    #[test]
    fn test_rescale_truncates_when_narrowing() {
        let twelve = RawAmount::from_units("95.23", 12).unwrap();
        let seven = twelve.rescale(12, 7).unwrap();
        assert_eq!(seven, RawAmount::from_units("95.23", 7).unwrap());
        assert_eq!(RawAmount::new(1_999).rescale(3, 0).unwrap(), RawAmount::new(1));
    }

    #[test]
    fn test_truncate_units_never_rounds_up() {
        assert_eq!(truncate_units("95.2379", 2).unwrap(), "95.23");
        assert_eq!(truncate_units("7", 2).unwrap(), "7.00");
        assert_eq!(truncate_units("0.999", 2).unwrap(), "0.99");
        assert_eq!(truncate_units("007.1", 2).unwrap(), "7.10");
    }

    #[test]
    fn test_less_bps() {
        let amount = RawAmount::new(10_000);
        assert_eq!(amount.less_bps(50).unwrap(), RawAmount::new(9_950));
        assert_eq!(amount.less_bps(20_000).unwrap(), RawAmount::ZERO);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&RawAmount::new(u128::MAX)).unwrap();
        assert_eq!(json, format!("\"{}\"", u128::MAX));
        let back: RawAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RawAmount::new(u128::MAX));
    }
}
