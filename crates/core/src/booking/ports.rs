use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::booking::wire::{
    ChargeRequest, QuoteSubmission, ReferralValidationRequest, SetupIntentRequest,
    SetupIntentResponse,
};
use crate::domain::catalog::DiscountRate;
use crate::domain::customer::{ChargeReceipt, CustomerRecord};
use crate::errors::{CollaboratorError, PaymentSetupError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCandidate {
    pub description: String,
    pub place_id: String,
}

#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn suggest(&self, input: &str) -> Result<Vec<AddressCandidate>, CollaboratorError>;

    /// Canonical formatted address for a chosen suggestion.
    async fn resolve(&self, candidate: &AddressCandidate) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait QuotePersistence: Send + Sync {
    async fn submit_quote(&self, submission: &QuoteSubmission) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait PaymentSetupGateway: Send + Sync {
    async fn create_setup_intent(
        &self,
        request: &SetupIntentRequest,
    ) -> Result<SetupIntentResponse, PaymentSetupError>;
}

#[async_trait]
pub trait ReferralValidator: Send + Sync {
    /// Returns the discount for a valid code. An invalid code is a
    /// `CollaboratorError::Rejected`.
    async fn validate(
        &self,
        request: &ReferralValidationRequest,
    ) -> Result<DiscountRate, CollaboratorError>;
}

#[async_trait]
pub trait AdminGateway: Send + Sync {
    /// `Ok(false)` is a wrong password; errors are transport or server faults.
    async fn login(&self, password: &SecretString) -> Result<bool, CollaboratorError>;
    async fn list_customers(&self) -> Result<Vec<CustomerRecord>, CollaboratorError>;
    async fn charge_customer(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeReceipt, CollaboratorError>;
}
