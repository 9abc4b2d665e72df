//! Token amounts
//!
//! User input and display use decimal amounts; chains use integer base units.
//! Conversions truncate toward zero at the token's decimals, never round up.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("amount must not be negative")]
    Negative,
    #[error("amount does not fit in base units")]
    TooLarge,
}

/// Parse user input, truncating to `decimals` fractional digits
pub fn parse_amount(input: &str, decimals: u8) -> Result<BigDecimal, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Invalid("empty".into()));
    }
    let value =
        BigDecimal::from_str(trimmed).map_err(|e| AmountError::Invalid(e.to_string()))?;
    if value < BigDecimal::from(0) {
        return Err(AmountError::Negative);
    }
    Ok(value.with_scale(decimals as i64))
}

/// Decimal value of `units` base units
pub fn from_units(units: u128, decimals: u8) -> BigDecimal {
    BigDecimal::new(BigInt::from(units), decimals as i64)
}

/// Base units of a decimal value, truncating extra precision
pub fn to_units(value: &BigDecimal, decimals: u8) -> Result<u128, AmountError> {
    if *value < BigDecimal::from(0) {
        return Err(AmountError::Negative);
    }
    let (units, _) = value.with_scale(decimals as i64).as_bigint_and_exponent();
    u128::try_from(&units).map_err(|_| AmountError::TooLarge)
}

/// Render base units with exactly `decimals` fractional digits
pub fn format_units(units: u128, decimals: u8) -> String {
    from_units(units, decimals).to_string()
}

/// Convert base units between token decimals, truncating when scaling down
pub fn rescale(units: u128, from_decimals: u8, to_decimals: u8) -> u128 {
    if to_decimals >= from_decimals {
        10u128
            .checked_pow((to_decimals - from_decimals) as u32)
            .map(|factor| units.saturating_mul(factor))
            .unwrap_or(u128::MAX)
    } else {
        10u128
            .checked_pow((from_decimals - to_decimals) as u32)
            .map(|factor| units / factor)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_truncates_to_decimals() {
        let value = parse_amount("1.23456", 2).unwrap();
        assert_eq!(value.to_string(), "1.23");
        assert_eq!(to_units(&value, 2).unwrap(), 123);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_amount("", 6), Err(AmountError::Invalid("empty".into())));
        assert!(matches!(parse_amount("abc", 6), Err(AmountError::Invalid(_))));
        assert_eq!(parse_amount("-1", 6), Err(AmountError::Negative));
    }

    #[test]
    fn test_units_conversion() {
        assert_eq!(from_units(1000, 2).to_string(), "10.00");
        assert_eq!(format_units(5, 3), "0.005");
        let value = BigDecimal::from_str("9.999").unwrap();
        assert_eq!(to_units(&value, 2).unwrap(), 999);
    }

    #[test]
    fn test_rescale_between_decimals() {
        assert_eq!(rescale(1_500_000, 6, 9), 1_500_000_000);
        assert_eq!(rescale(1_500_000_001, 9, 6), 1_500_000);
        assert_eq!(rescale(42, 18, 18), 42);
    }

    #[test]
    fn test_to_units_overflow() {
        let huge = BigDecimal::from_str("1e40").unwrap();
        assert_eq!(to_units(&huge, 0), Err(AmountError::TooLarge));
    }
}
