use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::Price;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

/// Customer as shown on the admin charge desk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: CustomerId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub lot_size: Option<String>,
    pub service_type: Option<String>,
    /// Agreed price captured at booking time.
    pub price: Option<Price>,
    pub has_payment_method: bool,
    pub charged: bool,
    pub charge_date: Option<DateTime<Utc>>,
}

impl CustomerRecord {
    pub fn is_chargeable(&self) -> bool {
        !self.charged && self.has_payment_method && self.price.is_some_and(|price| price > Price::ZERO)
    }

    pub fn mark_charged(&mut self, receipt: &ChargeReceipt) {
        self.charged = true;
        self.charge_date = Some(receipt.charged_at);
    }
}

/// Confirmation returned by the payment processor after a successful charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub customer_id: CustomerId,
    pub payment_intent_id: String,
    pub amount: Price,
    pub status: String,
    pub charged_at: DateTime<Utc>,
}
