//! # Quantity Module
//!
//! Fractional sale quantities (kilograms of produce, metres of cloth) as a
//! decimal with at most three fraction digits.
//!
//! ```text
//!   wire (JSON number)     store (INTEGER)
//!   2        ───────────►  2000 milli
//!   1.25     ───────────►  1250 milli
//!   0.125    ───────────►   125 milli
//!   0.0001   ──── rejected (more than 3 decimals)
//! ```
//!
//! Line subtotals are `quantity × unit price`, rounded half away from zero to
//! the nearest minor unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

/// Thousandths per whole unit.
pub const MILLI_PER_UNIT: i64 = 1000;

/// Fraction digits a quantity may carry.
pub const QUANTITY_SCALE: u32 = 3;

/// A quantity with at most [`QUANTITY_SCALE`] fraction digits whose
/// thousandths fit in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, TS)]
#[ts(export)]
pub struct Quantity(#[ts(type = "number")] Decimal);

impl Quantity {
    /// One whole unit.
    pub const ONE: Quantity = Quantity(Decimal::ONE);

    pub fn from_milli(milli: i64) -> Self {
        Quantity(Decimal::new(milli, QUANTITY_SCALE))
    }

    /// Whole units (`from_units(3)` is three pieces).
    pub fn from_units(units: i64) -> Self {
        Quantity::from_milli(units.saturating_mul(MILLI_PER_UNIT))
    }

    /// Accepts a decimal with at most three fraction digits.
    pub fn from_decimal(value: Decimal) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "quantity".to_string(),
            reason: reason.to_string(),
        };

        let value = value.normalize();
        if value.scale() > QUANTITY_SCALE {
            return Err(invalid("at most 3 decimal places"));
        }
        value
            .checked_mul(Decimal::from(MILLI_PER_UNIT))
            .and_then(|milli| milli.to_i64())
            .ok_or_else(|| invalid("too large"))?;

        Ok(Quantity(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Thousandths of a unit, the stored form.
    pub fn milli(&self) -> i64 {
        let mut scaled = self.0;
        scaled.rescale(QUANTITY_SCALE);
        i64::try_from(scaled.mantissa()).unwrap_or(if scaled.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    pub fn zero() -> Self {
        Quantity(Decimal::ZERO)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Prices this quantity at `unit_price`, rounding to the minor unit.
    ///
    /// `None` when the result does not fit in [`Money`].
    ///
    /// ```rust
    /// use stall_core::{Money, Quantity};
    ///
    /// // 0.333 kg at 10.00 → 3.33
    /// let subtotal = Quantity::from_milli(333).price(Money::from_minor(1000));
    /// assert_eq!(subtotal, Some(Money::from_minor(333)));
    /// ```
    pub fn price(&self, unit_price: Money) -> Option<Money> {
        self.0
            .checked_mul(Decimal::from(unit_price.minor()))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Money::from_minor)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Parses a plain decimal such as `"1.25"` or `"3"`.
impl FromStr for Quantity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| ValidationError::InvalidFormat {
            field: "quantity".to_string(),
            reason: e.to_string(),
        })?;
        Quantity::from_decimal(value)
    }
}

// =============================================================================
// Wire Form
// =============================================================================

/// Serializes as a JSON number (`1.25`), never as thousandths.
impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.0.normalize(), serializer)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = rust_decimal::serde::float::deserialize(deserializer)?;
        Quantity::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Stored Form
// =============================================================================

/// Stored as INTEGER thousandths.
#[cfg(feature = "sqlx")]
mod stored {
    use super::Quantity;
    use sqlx::encode::IsNull;
    use sqlx::error::BoxDynError;
    use sqlx::{Database, Decode, Encode, Type};

    impl<DB: Database> Type<DB> for Quantity
    where
        i64: Type<DB>,
    {
        fn type_info() -> DB::TypeInfo {
            <i64 as Type<DB>>::type_info()
        }

        fn compatible(ty: &DB::TypeInfo) -> bool {
            <i64 as Type<DB>>::compatible(ty)
        }
    }

    impl<'q, DB: Database> Encode<'q, DB> for Quantity
    where
        i64: Encode<'q, DB>,
    {
        fn encode_by_ref(
            &self,
            buf: &mut <DB as Database>::ArgumentBuffer<'q>,
        ) -> Result<IsNull, BoxDynError> {
            <i64 as Encode<'q, DB>>::encode_by_ref(&self.milli(), buf)
        }
    }

    impl<'r, DB: Database> Decode<'r, DB> for Quantity
    where
        i64: Decode<'r, DB>,
    {
        fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
            Ok(Quantity::from_milli(<i64 as Decode<'r, DB>>::decode(value)?))
        }
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}
