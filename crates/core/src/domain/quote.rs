use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};

/// Amount of money in minor currency units (cents).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const ZERO: Self = Self(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn from_major(major: u64) -> Self {
        Self(major * 100)
    }

    /// Converts a major-unit decimal (dollars) into minor units, rounding
    /// half away from zero. Negative or unrepresentable amounts yield `None`.
    pub fn from_major_decimal(major: Decimal) -> Option<Self> {
        if major.is_sign_negative() && !major.is_zero() {
            return None;
        }
        (major * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
            .map(Self)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub fn to_major(self) -> Decimal {
        Decimal::from(self.0) / Decimal::ONE_HUNDRED
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_multiple_of(self, unit: Self) -> bool {
        unit.0 != 0 && self.0 % unit.0 == 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Priced selection for one booking. Recomputed and replaced whenever an input
/// changes; never edited in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub lot_size: LotSizeTier,
    pub frequency: ServiceFrequency,
    pub referral_discount: Option<DiscountRate>,
    pub base_price: Price,
    pub final_price: Price,
}

impl Quote {
    pub fn has_referral_discount(&self) -> bool {
        self.referral_discount.is_some_and(|rate| !rate.is_zero())
    }
}
