use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::PricingError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotSizeTier {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl LotSizeTier {
    pub const ALL: [Self; 4] = [Self::Small, Self::Medium, Self::Large, Self::Xlarge];

    pub fn code(self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::Xlarge => "XLARGE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Small => "Small (up to 5,000 sq ft)",
            Self::Medium => "Medium (5,000 - 10,000 sq ft)",
            Self::Large => "Large (10,000 - 15,000 sq ft)",
            Self::Xlarge => "Extra Large (over 15,000 sq ft)",
        }
    }
}

impl fmt::Display for LotSizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for LotSizeTier {
    type Err = PricingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SMALL" => Ok(Self::Small),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            "XLARGE" => Ok(Self::Xlarge),
            _ => Err(PricingError::InvalidLotSize(value.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceFrequency {
    OneTime,
    Weekly,
    BiWeekly,
    Monthly,
}

impl ServiceFrequency {
    pub const ALL: [Self; 4] = [Self::OneTime, Self::Weekly, Self::BiWeekly, Self::Monthly];

    pub fn code(self) -> &'static str {
        match self {
            Self::OneTime => "ONE_TIME",
            Self::Weekly => "WEEKLY",
            Self::BiWeekly => "BI_WEEKLY",
            Self::Monthly => "MONTHLY",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OneTime => "One-time mowing",
            Self::Weekly => "Weekly mowing",
            Self::BiWeekly => "Bi-Weekly mowing",
            Self::Monthly => "Monthly mowing",
        }
    }
}

impl fmt::Display for ServiceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ServiceFrequency {
    type Err = PricingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ONE_TIME" => Ok(Self::OneTime),
            "WEEKLY" => Ok(Self::Weekly),
            "BI_WEEKLY" | "BIWEEKLY" => Ok(Self::BiWeekly),
            "MONTHLY" => Ok(Self::Monthly),
            _ => Err(PricingError::InvalidService(value.to_string())),
        }
    }
}

/// A discount fraction in `[0, 1)`.
///
/// Used both for the per-frequency service discount and for referral
/// discounts returned by the referral service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct DiscountRate(Decimal);

impl DiscountRate {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, PricingError> {
        if value < Decimal::ZERO || value >= Decimal::ONE {
            return Err(PricingError::InvalidDiscount(value.to_string()));
        }
        Ok(Self(value.normalize()))
    }

    /// Table constant; callers outside the crate go through [`DiscountRate::new`].
    pub(crate) fn fixed(value: Decimal) -> Self {
        Self(value)
    }

    /// Builds a rate from basis points (`2000` is 20%).
    pub fn from_basis_points(points: u32) -> Result<Self, PricingError> {
        Self::new(Decimal::new(i64::from(points), 4))
    }

    pub fn value(self) -> Decimal {
        self.0
    }

    pub fn complement(self) -> Decimal {
        Decimal::ONE - self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for DiscountRate {
    type Error = PricingError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DiscountRate> for Decimal {
    fn from(value: DiscountRate) -> Self {
        value.0
    }
}

impl fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", (self.0 * Decimal::ONE_HUNDRED).normalize())
    }
}
