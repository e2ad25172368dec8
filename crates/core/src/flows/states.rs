use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStep {
    Contact,
    Details,
    Confirmation,
    PaymentRedirect,
}

impl BookingStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PaymentRedirect)
    }

    /// One-based position shown in the step indicator.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Contact => 1,
            Self::Details => 2,
            Self::Confirmation => 3,
            Self::PaymentRedirect => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Advance,
    Back,
    RedirectIssued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Name,
    Email,
    Phone,
    Address,
    LotSize,
    Frequency,
    Quote,
}

impl DraftField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::LotSize => "lot_size",
            Self::Frequency => "service_type",
            Self::Quote => "price",
        }
    }
}

impl fmt::Display for DraftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level validation message shown next to the offending input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: DraftField,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: DraftField, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub issues: Vec<FieldIssue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    CollectServiceDetails,
    ReviewQuote,
    RedirectToPaymentSetup,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: BookingStep,
    pub to: BookingStep,
    pub event: BookingEvent,
    pub actions: Vec<FlowAction>,
}
