//! JSON payloads exchanged with the booking backend.
//!
//! Amounts sent to payment setup and quote persistence are minor units.
//! Admin charge amounts are major units because the backend converts them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingDraft;
use crate::domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
use crate::domain::customer::{ChargeReceipt, CustomerId, CustomerRecord};
use crate::domain::quote::{Price, Quote};
use crate::errors::{Collaborator, CollaboratorError};

const NOT_PROVIDED: &str = "Not provided";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSubmission {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub lot_size: LotSizeTier,
    pub service_type: ServiceFrequency,
    pub price: Price,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

impl QuoteSubmission {
    pub fn from_draft(draft: &BookingDraft, quote: &Quote) -> Self {
        Self {
            name: or_not_provided(&draft.contact.name),
            email: or_not_provided(&draft.contact.email),
            phone: draft.contact.phone.trim().to_owned(),
            address: draft.address.trim().to_owned(),
            lot_size: quote.lot_size,
            service_type: quote.frequency,
            price: quote.final_price,
            start_date: draft.start_date,
            referral_code: draft.referral.as_ref().map(|referral| referral.code.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntentMetadata {
    pub name: String,
    pub email: String,
    pub start_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub service_type: ServiceFrequency,
    pub lot_size: LotSizeTier,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntentRequest {
    pub price: Price,
    pub service_type: ServiceFrequency,
    pub address: String,
    pub lot_size: LotSizeTier,
    pub phone: String,
    pub start_date: NaiveDate,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    pub metadata: SetupIntentMetadata,
}

impl SetupIntentRequest {
    pub fn from_draft(
        draft: &BookingDraft,
        quote: &Quote,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            price: quote.final_price,
            service_type: quote.frequency,
            address: draft.address.trim().to_owned(),
            lot_size: quote.lot_size,
            phone: draft.contact.phone.trim().to_owned(),
            start_date: draft.start_date,
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            referral_code: draft.referral.as_ref().map(|referral| referral.code.clone()),
            metadata: SetupIntentMetadata {
                name: or_not_provided(&draft.contact.name),
                email: or_not_provided(&draft.contact.email),
                start_date: draft.start_date,
                price: quote.final_price.to_major(),
                service_type: quote.frequency,
                lot_size: quote.lot_size,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntentResponse {
    #[serde(rename = "setupIntentUrl", default)]
    pub setup_intent_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetupIntentResponse {
    /// The redirect target, ignoring blank values.
    pub fn redirect_url(&self) -> Option<&str> {
        self.setup_intent_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralValidationRequest {
    pub code: String,
    pub referee_email: String,
}

impl ReferralValidationRequest {
    pub fn new(code: &str, referee_email: &str) -> Self {
        Self { code: normalize_referral_code(code), referee_email: or_not_provided(referee_email) }
    }
}

pub fn normalize_referral_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralValidationResponse {
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReferralValidationResponse {
    pub fn into_discount(self) -> Result<DiscountRate, CollaboratorError> {
        if self.valid == Some(false) || self.error.is_some() {
            return Err(CollaboratorError::Rejected {
                collaborator: Collaborator::ReferralValidation,
                status: None,
                message: self.error.unwrap_or_else(|| "Invalid referral code".to_owned()),
            });
        }

        let discount = self.discount.ok_or_else(|| CollaboratorError::Malformed {
            collaborator: Collaborator::ReferralValidation,
            message: "response did not include a discount".to_owned(),
        })?;
        DiscountRate::new(discount).map_err(|error| CollaboratorError::Malformed {
            collaborator: Collaborator::ReferralValidation,
            message: error.to_string(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// Pulls the `{error}` message out of a failed response, falling back to the
/// raw body and then to the status code.
pub fn error_message(body: &str, status: u16) -> String {
    if let Ok(ErrorBody { error: Some(message) }) = serde_json::from_str::<ErrorBody>(body) {
        if !message.trim().is_empty() {
            return message;
        }
    }
    let raw = body.trim();
    if raw.is_empty() {
        format!("HTTP error! status: {status}")
    } else {
        raw.to_owned()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AdminLoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CustomerListResponse {
    #[serde(default)]
    pub customers: Vec<CustomerPayload>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CustomerPayload {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub has_payment_method: bool,
    #[serde(default)]
    pub charged: Option<bool>,
}

impl CustomerPayload {
    pub fn into_record(self) -> CustomerRecord {
        let meta = |key: &str| {
            self.metadata.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
        };

        let price = meta("agreed_price")
            .or_else(|| meta("price"))
            .and_then(|raw| raw.parse::<Decimal>().ok())
            .and_then(Price::from_major_decimal);
        let charged = self.charged.unwrap_or(false) || meta("charged") == Some("true");
        let charge_date = meta("charge_date")
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        let phone = self.phone.clone().or_else(|| meta("phone").map(str::to_owned));
        let address = meta("address").map(str::to_owned);
        let lot_size = meta("lot_size").map(str::to_owned);
        let service_type = meta("service_type").map(str::to_owned);

        CustomerRecord {
            id: CustomerId(self.id),
            name: self.name,
            email: self.email,
            phone,
            address,
            lot_size,
            service_type,
            price,
            has_payment_method: self.has_payment_method,
            charged,
            charge_date,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub customer_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl ChargeRequest {
    pub fn new(customer_id: &CustomerId, price: Price) -> Self {
        Self { customer_id: customer_id.0.clone(), amount: price.to_major() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChargeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub charge_date: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChargeResponse {
    pub fn into_receipt(self, request: &ChargeRequest) -> Result<ChargeReceipt, CollaboratorError> {
        if !self.success {
            return Err(CollaboratorError::Rejected {
                collaborator: Collaborator::Admin,
                status: None,
                message: self.error.unwrap_or_else(|| "Payment failed".to_owned()),
            });
        }

        let amount = Price::from_major_decimal(self.amount.unwrap_or(request.amount)).ok_or_else(
            || CollaboratorError::Malformed {
                collaborator: Collaborator::Admin,
                message: "charge amount is not a valid price".to_owned(),
            },
        )?;
        let charged_at = self
            .charge_date
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Ok(ChargeReceipt {
            customer_id: CustomerId(request.customer_id.clone()),
            payment_intent_id: self.payment_intent_id.unwrap_or_default(),
            amount,
            status: self.status.unwrap_or_else(|| "succeeded".to_owned()),
            charged_at,
        })
    }
}

fn or_not_provided(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        NOT_PROVIDED.to_owned()
    } else {
        trimmed.to_owned()
    }
}
