use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::booking::in_flight::InFlight;
use crate::booking::ports::AdminGateway;
use crate::booking::wire::ChargeRequest;
use crate::domain::customer::{ChargeReceipt, CustomerId, CustomerRecord};
use crate::domain::quote::Price;
use crate::errors::CollaboratorError;

const ACTOR: &str = "admin-desk";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("admin session is not authenticated")]
    NotAuthenticated,
    #[error("invalid admin password")]
    InvalidPassword,
    #[error("unknown customer `{0}`")]
    UnknownCustomer(String),
    #[error("customer `{0}` has already been charged")]
    AlreadyCharged(String),
    #[error("customer `{0}` has no saved payment method")]
    NoPaymentMethod(String),
    #[error("customer `{0}` has no agreed price")]
    NoAmount(String),
    #[error("a charge is already in progress")]
    InFlight,
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl AdminError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "Please log in first.",
            Self::InvalidPassword => "Invalid password",
            Self::UnknownCustomer(_) => "That customer is no longer listed. Refresh and try again.",
            Self::AlreadyCharged(_) => "Payment has already been collected for this customer.",
            Self::NoPaymentMethod(_) => "This customer has not saved a payment method.",
            Self::NoAmount(_) => "This customer has no price to charge.",
            Self::InFlight => "Please wait for the current charge to finish.",
            Self::Collaborator(_) => "The charge could not be completed. Please try again.",
        }
    }
}

/// Operator view over booked customers and their saved payment methods.
pub struct AdminDesk {
    authenticated: bool,
    customers: Vec<CustomerRecord>,
    charging: InFlight,
    audit: Arc<dyn AuditSink>,
    correlation_id: String,
}

impl AdminDesk {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            authenticated: false,
            customers: Vec::new(),
            charging: InFlight::default(),
            audit,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn customers(&self) -> &[CustomerRecord] {
        &self.customers
    }

    pub fn customer(&self, id: &CustomerId) -> Option<&CustomerRecord> {
        self.customers.iter().find(|customer| &customer.id == id)
    }

    pub fn charging_flag(&self) -> InFlight {
        self.charging.clone()
    }

    pub async fn login(
        &mut self,
        gateway: &dyn AdminGateway,
        password: &SecretString,
    ) -> Result<(), AdminError> {
        let accepted = gateway.login(password).await?;
        self.emit(
            "admin.login",
            if accepted { AuditOutcome::Success } else { AuditOutcome::Rejected },
            None,
        );
        if !accepted {
            return Err(AdminError::InvalidPassword);
        }
        self.authenticated = true;
        Ok(())
    }

    pub fn logout(&mut self) {
        self.authenticated = false;
        self.customers.clear();
    }

    /// Reloads the customer list. A charge confirmed in this session stays
    /// marked even if the listing has not caught up yet.
    pub async fn refresh(&mut self, gateway: &dyn AdminGateway) -> Result<&[CustomerRecord], AdminError> {
        if !self.authenticated {
            return Err(AdminError::NotAuthenticated);
        }

        let mut fresh = gateway.list_customers().await?;
        for customer in &mut fresh {
            if let Some(known) = self.customer(&customer.id) {
                if known.charged && !customer.charged {
                    customer.charged = true;
                    customer.charge_date = known.charge_date;
                }
            }
        }
        self.customers = fresh;
        tracing::info!(
            event_name = "admin.customers_loaded",
            correlation_id = %self.correlation_id,
            count = self.customers.len(),
            "customer list refreshed"
        );
        Ok(&self.customers)
    }

    pub async fn collect_payment(
        &mut self,
        gateway: &dyn AdminGateway,
        customer_id: &CustomerId,
    ) -> Result<ChargeReceipt, AdminError> {
        if !self.authenticated {
            return Err(AdminError::NotAuthenticated);
        }

        let index = self
            .customers
            .iter()
            .position(|customer| &customer.id == customer_id)
            .ok_or_else(|| AdminError::UnknownCustomer(customer_id.0.clone()))?;
        let amount = chargeable_amount(&self.customers[index])?;

        let Some(_guard) = self.charging.try_begin() else {
            return Err(AdminError::InFlight);
        };

        let request = ChargeRequest::new(customer_id, amount);
        match gateway.charge_customer(&request).await {
            Ok(receipt) => {
                self.customers[index].mark_charged(&receipt);
                self.emit(
                    "admin.charge_confirmed",
                    AuditOutcome::Success,
                    Some((customer_id, receipt.amount)),
                );
                Ok(receipt)
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "admin.charge_failed",
                    correlation_id = %self.correlation_id,
                    customer_id = %customer_id.0,
                    error = %error,
                    "charge failed; customer left uncharged"
                );
                self.emit("admin.charge_failed", AuditOutcome::Failed, Some((customer_id, amount)));
                Err(error.into())
            }
        }
    }

    fn emit(&self, event_type: &str, outcome: AuditOutcome, charge: Option<(&CustomerId, Price)>) {
        let context = AuditContext::new(None, self.correlation_id.clone(), ACTOR);
        let mut event = AuditEvent::from_context(&context, event_type, AuditCategory::Admin, outcome);
        if let Some((customer_id, amount)) = charge {
            event = event
                .with_metadata("customer_id", customer_id.0.clone())
                .with_metadata("amount", amount.to_string());
        }
        self.audit.emit(event);
    }
}

fn chargeable_amount(customer: &CustomerRecord) -> Result<Price, AdminError> {
    let id = || customer.id.0.clone();
    if customer.charged {
        return Err(AdminError::AlreadyCharged(id()));
    }
    if !customer.has_payment_method {
        return Err(AdminError::NoPaymentMethod(id()));
    }
    match customer.price {
        Some(price) if price > Price::ZERO => Ok(price),
        _ => Err(AdminError::NoAmount(id())),
    }
}
