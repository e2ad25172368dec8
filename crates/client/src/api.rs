use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use lawnpeak_core::booking::ports::{
    AdminGateway, PaymentSetupGateway, QuotePersistence, ReferralValidator,
};
use lawnpeak_core::booking::wire::{
    error_message, AdminLoginRequest, AdminLoginResponse, ChargeRequest, ChargeResponse,
    CustomerListResponse, QuoteSubmission, ReferralValidationRequest, ReferralValidationResponse,
    SetupIntentRequest, SetupIntentResponse,
};
use lawnpeak_core::config::ApiConfig;
use lawnpeak_core::{
    ChargeReceipt, Collaborator, CollaboratorError, CustomerRecord, DiscountRate,
    PaymentSetupError,
};

use crate::ClientSetupError;

/// JSON client for the booking backend.
#[derive(Clone, Debug)]
pub struct HttpBookingApi {
    client: Client,
    base_url: String,
}

impl HttpBookingApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientSetupError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into() })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientSetupError> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn post_json<B>(&self, path: &str, body: &B) -> Result<Response, reqwest::Error>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(event_name = "http.request", method = "POST", url = %url, "calling booking api");
        self.client.post(url).json(body).send().await
    }
}

async fn read_body(
    response: Response,
    collaborator: Collaborator,
) -> Result<(StatusCode, String), CollaboratorError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|error| CollaboratorError::Unavailable { collaborator, message: error.to_string() })?;
    Ok((status, body))
}

fn decode<T>(body: &str, collaborator: Collaborator) -> Result<T, CollaboratorError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(body)
        .map_err(|error| CollaboratorError::Malformed { collaborator, message: error.to_string() })
}

fn unavailable(collaborator: Collaborator, error: reqwest::Error) -> CollaboratorError {
    warn!(
        event_name = "http.transport_failed",
        collaborator = %collaborator,
        error = %error,
        "booking api unreachable"
    );
    CollaboratorError::Unavailable { collaborator, message: error.to_string() }
}

fn rejected(collaborator: Collaborator, status: StatusCode, body: &str) -> CollaboratorError {
    CollaboratorError::Rejected {
        collaborator,
        status: Some(status.as_u16()),
        message: error_message(body, status.as_u16()),
    }
}

#[async_trait]
impl QuotePersistence for HttpBookingApi {
    async fn submit_quote(&self, submission: &QuoteSubmission) -> Result<(), CollaboratorError> {
        let collaborator = Collaborator::QuotePersistence;
        let response = self
            .post_json("/submit-quote", submission)
            .await
            .map_err(|error| unavailable(collaborator, error))?;
        let (status, body) = read_body(response, collaborator).await?;
        if !status.is_success() {
            return Err(rejected(collaborator, status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentSetupGateway for HttpBookingApi {
    async fn create_setup_intent(
        &self,
        request: &SetupIntentRequest,
    ) -> Result<SetupIntentResponse, PaymentSetupError> {
        let response = self
            .post_json("/create-setup-intent", request)
            .await
            .map_err(|error| PaymentSetupError::Transport(error.to_string()))?;
        let status = response.status();
        let body =
            response.text().await.map_err(|error| PaymentSetupError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(PaymentSetupError::Rejected {
                status: status.as_u16(),
                message: error_message(&body, status.as_u16()),
            });
        }

        let parsed: SetupIntentResponse = serde_json::from_str(&body)
            .map_err(|error| PaymentSetupError::MalformedResponse(error.to_string()))?;
        if parsed.redirect_url().is_none() {
            if let Some(message) = parsed.error {
                return Err(PaymentSetupError::Rejected { status: status.as_u16(), message });
            }
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ReferralValidator for HttpBookingApi {
    async fn validate(
        &self,
        request: &ReferralValidationRequest,
    ) -> Result<DiscountRate, CollaboratorError> {
        let collaborator = Collaborator::ReferralValidation;
        let response = self
            .post_json("/api/referral/validate", request)
            .await
            .map_err(|error| unavailable(collaborator, error))?;
        let (status, body) = read_body(response, collaborator).await?;

        if status.is_server_error() || status == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::Unavailable {
                collaborator,
                message: error_message(&body, status.as_u16()),
            });
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ReferralValidationResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or_else(|| "Invalid referral code".to_owned());
            return Err(CollaboratorError::Rejected {
                collaborator,
                status: Some(status.as_u16()),
                message,
            });
        }

        decode::<ReferralValidationResponse>(&body, collaborator)?.into_discount()
    }
}

#[async_trait]
impl AdminGateway for HttpBookingApi {
    async fn login(&self, password: &SecretString) -> Result<bool, CollaboratorError> {
        let collaborator = Collaborator::Admin;
        let request = AdminLoginRequest { password: password.expose_secret().to_owned() };
        let response = self
            .post_json("/admin-login", &request)
            .await
            .map_err(|error| unavailable(collaborator, error))?;
        let (status, body) = read_body(response, collaborator).await?;

        if status == StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(rejected(collaborator, status, &body));
        }
        Ok(decode::<AdminLoginResponse>(&body, collaborator)?.success)
    }

    async fn list_customers(&self) -> Result<Vec<CustomerRecord>, CollaboratorError> {
        let collaborator = Collaborator::Admin;
        let url = self.url("/list-customers");
        let response =
            self.client.get(url).send().await.map_err(|error| unavailable(collaborator, error))?;
        let (status, body) = read_body(response, collaborator).await?;
        if !status.is_success() {
            return Err(rejected(collaborator, status, &body));
        }

        let listing: CustomerListResponse = decode(&body, collaborator)?;
        Ok(listing.customers.into_iter().map(|payload| payload.into_record()).collect())
    }

    async fn charge_customer(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeReceipt, CollaboratorError> {
        let collaborator = Collaborator::Admin;
        let response = self
            .post_json("/charge-customer", request)
            .await
            .map_err(|error| unavailable(collaborator, error))?;
        let (status, body) = read_body(response, collaborator).await?;
        if !status.is_success() {
            return Err(rejected(collaborator, status, &body));
        }

        decode::<ChargeResponse>(&body, collaborator)?.into_receipt(request)
    }
}
