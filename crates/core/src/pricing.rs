use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PricingConfig;
use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
use crate::domain::quote::{Price, Quote};

pub const DEFAULT_ROUNDING_UNIT: Price = Price::from_minor(500);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("invalid lot size `{0}`")]
    InvalidLotSize(String),
    #[error("invalid service selected `{0}`")]
    InvalidService(String),
    #[error("discount `{0}` must be in range [0, 1)")]
    InvalidDiscount(String),
}

impl PricingError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidLotSize(_) => "Please choose your lot size.",
            Self::InvalidService(_) => "Please choose a service frequency.",
            Self::InvalidDiscount(_) => "This discount could not be applied.",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Price,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTrace {
    pub lot_size: LotSizeTier,
    pub frequency: ServiceFrequency,
    pub steps: Vec<PricingTraceStep>,
    pub total: Price,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceGridRow {
    pub lot_size: LotSizeTier,
    pub frequency: ServiceFrequency,
    pub price: Price,
    pub savings: Price,
}

/// Fixed price rules: base price per lot size, discount per service frequency,
/// and the unit final prices are rounded to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingTable {
    base_prices: BTreeMap<LotSizeTier, Price>,
    discounts: BTreeMap<ServiceFrequency, DiscountRate>,
    rounding_unit: Price,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::canonical()
    }
}

impl PricingTable {
    pub fn canonical() -> Self {
        let base_prices = BTreeMap::from([
            (LotSizeTier::Small, Price::from_major(60)),
            (LotSizeTier::Medium, Price::from_major(70)),
            (LotSizeTier::Large, Price::from_major(75)),
            (LotSizeTier::Xlarge, Price::from_major(80)),
        ]);
        let discounts = BTreeMap::from([
            (ServiceFrequency::OneTime, DiscountRate::ZERO),
            (ServiceFrequency::Weekly, DiscountRate::fixed(Decimal::new(20, 2))),
            (ServiceFrequency::BiWeekly, DiscountRate::fixed(Decimal::new(10, 2))),
            (ServiceFrequency::Monthly, DiscountRate::ZERO),
        ]);

        Self { base_prices, discounts, rounding_unit: DEFAULT_ROUNDING_UNIT }
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        Self::canonical().with_rounding_unit(Price::from_minor(config.rounding_unit))
    }

    pub fn with_rounding_unit(mut self, unit: Price) -> Self {
        self.rounding_unit = unit;
        self
    }

    pub fn rounding_unit(&self) -> Price {
        self.rounding_unit
    }

    pub fn base_price(&self, lot_size: LotSizeTier) -> Result<Price, PricingError> {
        self.base_prices
            .get(&lot_size)
            .copied()
            .ok_or_else(|| PricingError::InvalidLotSize(lot_size.code().to_string()))
    }

    pub fn discount(&self, frequency: ServiceFrequency) -> Result<DiscountRate, PricingError> {
        self.discounts
            .get(&frequency)
            .copied()
            .ok_or_else(|| PricingError::InvalidService(frequency.code().to_string()))
    }

    /// Prices a selection. Unset inputs fail the same way unknown ones do so
    /// that a missing choice can never be quoted as zero.
    pub fn compute_price(
        &self,
        lot_size: Option<LotSizeTier>,
        frequency: Option<ServiceFrequency>,
        referral: Option<DiscountRate>,
    ) -> Result<Price, PricingError> {
        self.explain(lot_size, frequency, referral).map(|trace| trace.total)
    }

    pub fn explain(
        &self,
        lot_size: Option<LotSizeTier>,
        frequency: Option<ServiceFrequency>,
        referral: Option<DiscountRate>,
    ) -> Result<PricingTrace, PricingError> {
        let lot_size = lot_size.ok_or_else(|| PricingError::InvalidLotSize("unset".to_string()))?;
        let frequency =
            frequency.ok_or_else(|| PricingError::InvalidService("unset".to_string()))?;

        let base = self.base_price(lot_size)?;
        let service_discount = self.discount(frequency)?;
        let mut steps = vec![PricingTraceStep {
            stage: "base".to_string(),
            detail: lot_size.label().to_string(),
            amount: base,
        }];

        let after_service = apply_discount(base, service_discount);
        steps.push(PricingTraceStep {
            stage: "service_discount".to_string(),
            detail: format!("{} at {service_discount} off", frequency.label()),
            amount: after_service,
        });

        let after_referral = match referral {
            Some(rate) => {
                let discounted = apply_discount(after_service, rate);
                steps.push(PricingTraceStep {
                    stage: "referral_discount".to_string(),
                    detail: format!("referral at {rate} off"),
                    amount: discounted,
                });
                discounted
            }
            None => after_service,
        };

        let total = round_to_unit(after_referral, self.rounding_unit);
        steps.push(PricingTraceStep {
            stage: "rounding".to_string(),
            detail: format!("nearest {} (half up)", self.rounding_unit),
            amount: total,
        });

        Ok(PricingTrace { lot_size, frequency, steps, total })
    }

    pub fn quote(
        &self,
        lot_size: Option<LotSizeTier>,
        frequency: Option<ServiceFrequency>,
        referral: Option<DiscountRate>,
    ) -> Result<Quote, PricingError> {
        let trace = self.explain(lot_size, frequency, referral)?;
        Ok(Quote {
            lot_size: trace.lot_size,
            frequency: trace.frequency,
            referral_discount: referral,
            base_price: self.base_price(trace.lot_size)?,
            final_price: trace.total,
        })
    }

    /// One-time price for the tier, shown struck through next to the quote.
    pub fn original_price(&self, lot_size: LotSizeTier) -> Result<Price, PricingError> {
        self.compute_price(Some(lot_size), Some(ServiceFrequency::OneTime), None)
    }

    pub fn savings(&self, quote: &Quote) -> Price {
        self.original_price(quote.lot_size)
            .map(|original| original.saturating_sub(quote.final_price))
            .unwrap_or(Price::ZERO)
    }

    pub fn price_grid(&self) -> Result<Vec<PriceGridRow>, PricingError> {
        let mut rows = Vec::with_capacity(LotSizeTier::ALL.len() * ServiceFrequency::ALL.len());
        for lot_size in LotSizeTier::ALL {
            for frequency in ServiceFrequency::ALL {
                let quote = self.quote(Some(lot_size), Some(frequency), None)?;
                rows.push(PriceGridRow {
                    lot_size,
                    frequency,
                    price: quote.final_price,
                    savings: self.savings(&quote),
                });
            }
        }
        Ok(rows)
    }
}

fn apply_discount(amount: Price, rate: DiscountRate) -> Price {
    let discounted = (Decimal::from(amount.minor()) * rate.complement())
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    discounted.to_u64().map(Price::from_minor).unwrap_or(Price::ZERO)
}

fn round_to_unit(amount: Price, unit: Price) -> Price {
    let unit = unit.minor();
    if unit <= 1 {
        return amount;
    }
    let rounded = (amount.minor().saturating_add(unit / 2) / unit) * unit;
    Price::from_minor(rounded)
}
