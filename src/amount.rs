//! Signed amounts in minor currency units

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

use crate::types::{ReconciliationError, ReconciliationResult};

/// An amount of money expressed as an integer number of minor units
/// (cents, or whole pesos for zero-exponent currencies).
///
/// Arithmetic saturates at the `i64` bounds instead of overflowing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from a raw minor-unit value
    pub const fn new(minor_units: i64) -> Self {
        Self(minor_units)
    }

    /// Raw minor-unit value
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    /// Net of a debit/credit pair: `debit - credit`
    pub fn net(debit: Amount, credit: Amount) -> Amount {
        debit - credit
    }

    /// Magnitude of the amount
    pub fn abs(self) -> Amount {
        Self(self.0.saturating_abs())
    }

    /// -1, 0 or 1 depending on the sign
    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `self - other`, floored at zero
    pub fn saturating_sub_floor(self, other: Amount) -> Amount {
        Self(self.0.saturating_sub(other.0).max(0))
    }

    /// Render the amount in major units for a currency with `exponent` fractional digits
    pub fn to_major_units(self, exponent: u32) -> BigDecimal {
        BigDecimal::new(self.0.into(), i64::from(exponent))
    }

    /// Parse a major-unit value into minor units.
    ///
    /// Fails when `value` carries more fractional digits than `exponent`
    /// allows or does not fit in an `i64`.
    pub fn from_major_units(value: &BigDecimal, exponent: u32) -> ReconciliationResult<Amount> {
        let scaled = value * BigDecimal::new(1i64.into(), -i64::from(exponent));
        if !scaled.is_integer() {
            return Err(ReconciliationError::Validation(format!(
                "Amount {} has more than {} fractional digits",
                value, exponent
            )));
        }

        scaled.to_i64().map(Amount).ok_or_else(|| {
            ReconciliationError::Validation(format!("Amount {} is out of range", value))
        })
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}
