//! # Money Module
//!
//! `Money` holds an amount in the currency's minor unit (centavos, cents).
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Register reconciliation adds up every sale of the day:                 │
//! │                                                                         │
//! │    expected = opening + Σ sale.total                                    │
//! │    difference = counted − expected                                      │
//! │                                                                         │
//! │  With floats, 0.1 + 0.2 ≠ 0.3 and the drawer is "short" by 4e-17.       │
//! │  With i64 minor units every sum is exact, so a difference of 0 means    │
//! │  the drawer really balances.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stall_core::money::Money;
//!
//! let cash = Money::from_minor(3000);
//! let debit = Money::from_minor(2000);
//! let paid: Money = [cash, debit].into_iter().sum();
//! assert_eq!(paid.minor(), 5000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in minor units.
///
/// Signed so that reconciliation differences (drawer shortages) can be
/// represented directly. Serializes as a bare integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from minor units.
    ///
    /// ```rust
    /// use stall_core::money::Money;
    ///
    /// let price = Money::from_minor(1099);
    /// assert_eq!(price.minor(), 1099);
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the amount in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns true if `self` and `other` differ by at most `tolerance`.
    ///
    /// ```rust
    /// use stall_core::money::Money;
    ///
    /// let total = Money::from_minor(5000);
    /// assert!(total.within(Money::from_minor(5000), Money::zero()));
    /// assert!(!total.within(Money::from_minor(4990), Money::zero()));
    /// ```
    #[inline]
    pub fn within(&self, other: Money, tolerance: Money) -> bool {
        match self.0.checked_sub(other.0) {
            Some(diff) => diff.unsigned_abs() <= tolerance.0.unsigned_abs(),
            None => false,
        }
    }

    #[inline]
    pub const fn checked_add(self, other: Money) -> Option<Money> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Money(sum)),
            None => None,
        }
    }

    /// Sums `amounts`, or `None` if the total leaves the `i64` range.
    ///
    /// Use this for anything that arrives over the wire; the `Sum` impl
    /// assumes already-validated amounts.
    ///
    /// ```rust
    /// use stall_core::money::Money;
    ///
    /// let amounts = [Money::from_minor(i64::MAX), Money::from_minor(1)];
    /// assert_eq!(Money::checked_sum(amounts), None);
    /// ```
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal with two fraction digits, no currency symbol.
///
/// Currency formatting belongs to the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_minor(1099).to_string(), "10.99");
        assert_eq!(Money::from_minor(500).to_string(), "5.00");
        assert_eq!(Money::from_minor(-550).to_string(), "-5.50");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_minor(1000);
        let b = Money::from_minor(1500);

        assert_eq!((a + b).minor(), 2500);
        assert_eq!((a - b).minor(), -500);
        assert_eq!((-a).minor(), -1000);

        let amounts = vec![a, b, Money::from_minor(1)];
        let total: Money = amounts.iter().sum();
        assert_eq!(total.minor(), 2501);
    }

    #[test]
    fn test_checked_sum_reports_overflow() {
        let split = [Money::from_minor(3000), Money::from_minor(2000)];
        assert_eq!(Money::checked_sum(split), Some(Money::from_minor(5000)));
        assert_eq!(Money::checked_sum([]), Some(Money::zero()));

        let hostile = [Money::from_minor(i64::MAX), Money::from_minor(1)];
        assert_eq!(Money::checked_sum(hostile), None);
        assert_eq!(Money::from_minor(i64::MIN).checked_add(Money::from_minor(-1)), None);
    }

    #[test]
    fn test_within_tolerance() {
        let total = Money::from_minor(5000);
        assert!(total.within(Money::from_minor(5001), Money::from_minor(1)));
        assert!(!total.within(Money::from_minor(5002), Money::from_minor(1)));
        assert!(!Money::from_minor(i64::MIN).within(Money::from_minor(1), Money::zero()));
    }

    #[test]
    fn test_serializes_as_integer() {
        let json = serde_json::to_string(&Money::from_minor(1234)).unwrap();
        assert_eq!(json, "1234");
        let back: Money = serde_json::from_str("-75").unwrap();
        assert_eq!(back.minor(), -75);
    }
}
