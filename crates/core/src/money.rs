//! Monetary value objects: integer minor-unit amounts and basis-point rates.
//!
//! All money in the ledger is an `i64` count of the smallest currency unit
//! (e.g. cents). Percentages are basis points so that common business rates
//! (9%, 7.5%) stay exact. Division rounds half away from zero.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Amount in smallest currency unit (e.g., cents). Single currency by design.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(amount: i64) -> Self {
        Self(amount)
    }

    pub const fn minor(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }

    /// Multiply by an item quantity.
    pub fn times(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }

    /// Take a percentage of this amount, rounding half away from zero.
    ///
    /// The i128 intermediate cannot overflow: |amount| * 10_000 fits i128.
    pub fn apply(self, rate: Percent) -> Money {
        let scaled = i128::from(self.0) * i128::from(rate.basis_points());
        let half = if scaled >= 0 { 5_000 } else { -5_000 };
        Money(((scaled + half) / 10_000) as i64)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A percentage in basis points (1% = 100 bp), bounded to 0..=100%.
///
/// Out-of-range input is rejected, never clamped: the ledger does not
/// silently coerce bad numbers.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Percent(u16);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const MAX_BASIS_POINTS: u16 = 10_000;

    pub fn from_basis_points(bp: u16) -> DomainResult<Self> {
        if bp > Self::MAX_BASIS_POINTS {
            return Err(DomainError::validation(format!(
                "percent out of range: {bp} basis points exceeds 100%"
            )));
        }
        Ok(Self(bp))
    }

    /// Whole-percent constructor (e.g. `from_whole(9)` for 9%).
    pub fn from_whole(percent: u16) -> DomainResult<Self> {
        if percent > 100 {
            return Err(DomainError::validation(format!(
                "percent out of range: {percent} exceeds 100"
            )));
        }
        Ok(Self(percent * 100))
    }

    pub const fn basis_points(&self) -> u16 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for Percent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
