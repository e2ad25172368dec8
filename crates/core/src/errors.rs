use std::fmt;

use thiserror::Error;

use crate::booking::snapshot::SnapshotError;
use crate::flows::FlowTransitionError;
use crate::pricing::PricingError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collaborator {
    AddressLookup,
    QuotePersistence,
    PaymentSetup,
    ReferralValidation,
    Admin,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddressLookup => "address lookup",
            Self::QuotePersistence => "quote persistence",
            Self::PaymentSetup => "payment setup",
            Self::ReferralValidation => "referral validation",
            Self::Admin => "admin api",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {message}")]
    Unavailable { collaborator: Collaborator, message: String },
    #[error("{collaborator} rejected the request: {message}")]
    Rejected { collaborator: Collaborator, status: Option<u16>, message: String },
    #[error("{collaborator} returned an unreadable response: {message}")]
    Malformed { collaborator: Collaborator, message: String },
}

impl CollaboratorError {
    pub fn collaborator(&self) -> Collaborator {
        match self {
            Self::Unavailable { collaborator, .. }
            | Self::Rejected { collaborator, .. }
            | Self::Malformed { collaborator, .. } => *collaborator,
        }
    }

    /// Message safe to show next to the affected field.
    pub fn message(&self) -> &str {
        match self {
            Self::Unavailable { message, .. }
            | Self::Rejected { message, .. }
            | Self::Malformed { message, .. } => message,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PaymentSetupError {
    #[error("payment setup rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("payment setup response did not include a redirect url")]
    MissingRedirectUrl,
    #[error("payment setup request failed: {0}")]
    Transport(String),
    #[error("payment setup response could not be read: {0}")]
    MalformedResponse(String),
}

/// Failure of fire-and-forget reporting. Never shown to the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("quote persistence failed: {0}")]
    QuotePersistence(#[from] CollaboratorError),
    #[error("telemetry task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSurface {
    /// Shown beside the offending field; the step does not change.
    Inline,
    /// Non-blocking notice; the user may continue.
    Warning,
    /// Stops the action; the user must retry or go back.
    Blocking,
    LogOnly,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] FlowTransitionError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    PaymentSetup(#[from] PaymentSetupError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("{action} is already in progress")]
    AlreadyInFlight { action: &'static str },
}

impl BookingError {
    pub fn surface(&self) -> ErrorSurface {
        match self {
            Self::Validation(_) | Self::Pricing(_) => ErrorSurface::Inline,
            Self::Collaborator(_) | Self::AlreadyInFlight { .. } => ErrorSurface::Warning,
            Self::PaymentSetup(_) | Self::Snapshot(_) => ErrorSurface::Blocking,
            Self::Telemetry(_) => ErrorSurface::LogOnly,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Pricing(_) => "pricing",
            Self::Collaborator(_) => "collaborator",
            Self::PaymentSetup(_) => "payment_setup",
            Self::Snapshot(_) => "snapshot",
            Self::Telemetry(_) => "telemetry",
            Self::AlreadyInFlight { .. } => "in_flight",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Please complete the highlighted fields and try again.",
            Self::Pricing(error) => error.user_message(),
            Self::Collaborator(_) => {
                "That service is temporarily unavailable. You can continue without it."
            }
            Self::PaymentSetup(PaymentSetupError::MissingRedirectUrl) => {
                "We could not open the payment page. Please try again."
            }
            Self::PaymentSetup(_) => {
                "We could not start payment setup. Please try again in a moment."
            }
            Self::Snapshot(_) => {
                "Your booking could not be saved on this device, so payment was not started."
            }
            Self::Telemetry(_) => "An internal reporting step failed.",
            Self::AlreadyInFlight { .. } => "Please wait for the current request to finish.",
        }
    }
}
