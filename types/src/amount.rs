//! Asset amount type.
//!
//! Amounts are fixed-point integers (u128) in the asset's smallest unit.
//! All protocol arithmetic is checked; overflow and underflow surface as
//! `None` and are turned into deterministic rejections by callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// An asset amount in raw (smallest-unit) representation.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_mul(self, factor: u128) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Integer division of the amount into `n` equal shares, rounding up.
    ///
    /// Used to split a realized batch fee across the orders in the batch.
    /// Returns `None` for `n == 0`.
    pub fn share_ceil(self, n: u128) -> Option<Self> {
        if n == 0 {
            return None;
        }
        Some(Self(self.0.div_ceil(n)))
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).sum())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_sub_underflow_is_none() {
        assert_eq!(Amount::new(1).checked_sub(Amount::new(2)), None);
        assert_eq!(
            Amount::new(2).checked_sub(Amount::new(1)),
            Some(Amount::new(1))
        );
    }

    #[test]
    fn checked_add_overflow_is_none() {
        assert_eq!(Amount::new(u128::MAX).checked_add(Amount::new(1)), None);
    }

    #[test]
    fn share_ceil_rounds_up() {
        assert_eq!(Amount::new(10).share_ceil(3), Some(Amount::new(4)));
        assert_eq!(Amount::new(9).share_ceil(3), Some(Amount::new(3)));
        assert_eq!(Amount::new(10).share_ceil(0), None);
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = [Amount::new(1), Amount::new(2), Amount::new(3)]
            .into_iter()
            .sum();
        assert_eq!(total, Amount::new(6));
    }
}
