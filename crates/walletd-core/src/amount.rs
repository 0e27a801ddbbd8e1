//! Coin amount helpers.
//!
//! Amounts from the daemon arrive as decimal strings (`"0.0001"`) and
//! occasionally as the literal `"None"` when a value is not known yet.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// Satoshis per coin.
pub const COIN: i64 = 100_000_000;

/// Coins carry eight decimal places.
pub const DECIMALS: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount {0} does not fit in satoshis")]
    Overflow(Decimal),
}

/// Convert a coin amount to satoshis, rounding to the nearest unit.
pub fn satoshis(amount: Decimal) -> Result<i64, AmountError> {
    amount
        .checked_mul(Decimal::from(COIN))
        .map(|v| v.round())
        .and_then(|v| v.to_i64())
        .ok_or(AmountError::Overflow(amount))
}

/// Convert satoshis to a coin amount with eight decimal places.
pub fn bitcoins(sats: i64) -> Decimal {
    Decimal::new(sats, DECIMALS)
}

/// Parse an amount string returned by the daemon.
///
/// `"None"` maps to `Ok(None)`.
pub fn convert_amount_type(amount: &str) -> Result<Option<Decimal>, AmountError> {
    let amount = amount.trim();
    if amount == "None" {
        return Ok(None);
    }
    amount
        .parse::<Decimal>()
        .map(Some)
        .map_err(|_| AmountError::Invalid(amount.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn coins_to_satoshis() {
        assert_eq!(satoshis(dec("1")).unwrap(), 100_000_000);
        assert_eq!(satoshis(dec("0.00000001")).unwrap(), 1);
        assert_eq!(satoshis(dec("0.1")).unwrap(), 10_000_000);
        assert_eq!(satoshis(dec("-0.5")).unwrap(), -50_000_000);
    }

    #[test]
    fn sub_satoshi_amounts_round() {
        assert_eq!(satoshis(dec("0.000000015")).unwrap(), 2);
        assert_eq!(satoshis(dec("0.000000004")).unwrap(), 0);
    }

    #[test]
    fn satoshis_overflow() {
        assert!(matches!(
            satoshis(Decimal::MAX),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn satoshis_to_coins() {
        assert_eq!(bitcoins(100_000_000), dec("1"));
        assert_eq!(bitcoins(1).to_string(), "0.00000001");
        assert_eq!(bitcoins(10_000_000), dec("0.1"));
        assert_eq!(satoshis(bitcoins(123_456_789)).unwrap(), 123_456_789);
    }

    #[test]
    fn convert_daemon_strings() {
        assert_eq!(convert_amount_type("None").unwrap(), None);
        assert_eq!(convert_amount_type("0.5").unwrap(), Some(dec("0.5")));
        assert_eq!(
            convert_amount_type("abc").unwrap_err(),
            AmountError::Invalid("abc".into())
        );
    }
}
