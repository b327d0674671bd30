//! Fixed-point money type.
//!
//! All monetary amounts in the engine (order totals, offer prices, ledger
//! amounts, credit limits) are represented as [`Money`], a thin wrapper over
//! `rust_decimal::Decimal` rounded to two fractional digits. Binary floating
//! point never appears in a monetary field — `Money` is the only way in.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be positive, got {0}")]
    NotPositive(Decimal),
    #[error("amount must not be negative, got {0}")]
    Negative(Decimal),
    #[error("invalid decimal string: {0}")]
    InvalidFormat(String),
}

/// A non-negative monetary amount, rounded to 2 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Construct from a non-negative decimal, rounding to 2 places (banker's
    /// rounding via `rust_decimal`'s default `round_dp`).
    pub fn new(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() {
            return Err(MoneyError::Negative(amount));
        }
        Ok(Self(amount.round_dp(2)))
    }

    /// Construct from a non-negative decimal, requiring it to be strictly
    /// positive. Used at call sites where `amount > 0` is the contract
    /// (order totals, ledger entry amounts, reservation quantities' prices).
    pub fn new_positive(amount: Decimal) -> Result<Self, MoneyError> {
        let m = Self::new(amount)?;
        if m.0.is_zero() {
            return Err(MoneyError::NotPositive(amount));
        }
        Ok(m)
    }

    pub fn from_str_exact(s: &str) -> Result<Self, MoneyError> {
        let d = Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
        Self::new(d)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let r = self.0.checked_sub(other.0)?;
        if r.is_sign_negative() { None } else { Some(Self(r)) }
    }

    /// Difference that may legitimately go negative (e.g. `used - limit` when
    /// checking for an overrun). Returns a plain `Decimal`, not a `Money`.
    pub fn diff(self, other: Self) -> Decimal {
        self.0 - other.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Decimal;
    fn add(self, rhs: Self) -> Decimal {
        self.0 + rhs.0
    }
}

impl Sub for Money {
    type Output = Decimal;
    fn sub(self, rhs: Self) -> Decimal {
        self.0 - rhs.0
    }
}

impl Neg for Money {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        -self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_negative() {
        assert!(Money::new(dec!(-1.00)).is_err());
    }

    #[test]
    fn rounds_to_two_places() {
        let m = Money::new(dec!(10.005)).unwrap();
        assert_eq!(m.as_decimal(), dec!(10.00));
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(Money::new_positive(Decimal::ZERO).is_err());
        assert!(Money::new_positive(dec!(0.01)).is_ok());
    }

    #[test]
    fn checked_sub_refuses_negative_result() {
        let a = Money::new(dec!(5.00)).unwrap();
        let b = Money::new(dec!(10.00)).unwrap();
        assert!(a.checked_sub(b).is_none());
        assert_eq!(b.checked_sub(a).unwrap().as_decimal(), dec!(5.00));
    }
}
