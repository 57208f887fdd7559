use crate::error::TransferError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A token quantity in base units (wei-like integers, stored as `Decimal`).
///
/// Used for channel balances and on-chain deposit totals. Subtraction
/// saturates at zero: a balance never goes negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// A strictly positive quantity being moved by a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, TransferError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(TransferError::InvalidAmount(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = TransferError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<Balance> for Amount {
    type Error = TransferError;

    fn try_from(value: Balance) -> Result<Self, Self::Error> {
        Self::new(value.0)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// The increase from `baseline` to `self`, if any.
    pub fn increase_over(&self, baseline: Balance) -> Option<Amount> {
        Amount::new(self.0 - baseline.0).ok()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self((self.0 - rhs.0).max(Decimal::ZERO))
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10));
        let b2 = Balance::new(dec!(5));
        assert_eq!(b1 + b2, Balance::new(dec!(15)));
        assert_eq!(b1 - b2, Balance::new(dec!(5)));
        assert_eq!(b2 - b1, Balance::ZERO);
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0)),
            Err(TransferError::InvalidAmount(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1)),
            Err(TransferError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_increase_over() {
        let baseline = Balance::new(dec!(5));
        assert_eq!(
            Balance::new(dec!(12)).increase_over(baseline),
            Some(Amount::new(dec!(7)).unwrap())
        );
        assert_eq!(Balance::new(dec!(5)).increase_over(baseline), None);
        assert_eq!(Balance::new(dec!(3)).increase_over(baseline), None);
    }

    #[test]
    fn test_amount_rejects_zero_on_deserialize() {
        let parsed: Result<Amount, _> = serde_json::from_str("\"0\"");
        assert!(parsed.is_err());
        let parsed: Amount = serde_json::from_str("\"2.5\"").unwrap();
        assert_eq!(parsed.value(), dec!(2.5));
    }
}
