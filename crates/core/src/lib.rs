pub mod admin;
pub mod audit;
pub mod booking;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod pricing;

pub use admin::{AdminDesk, AdminError};
pub use booking::{BookingCoordinator, BookingSession, RedirectUrl, ReturnUrls, SetupReturn};
pub use domain::booking::{BookingDraft, BookingId, BookingSnapshot, ContactInfo};
pub use domain::catalog::{DiscountRate, LotSizeTier, ServiceFrequency};
pub use domain::customer::{ChargeReceipt, CustomerId, CustomerRecord};
pub use domain::quote::{Price, Quote};
pub use errors::{
    BookingError, Collaborator, CollaboratorError, ErrorSurface, PaymentSetupError, TelemetryError,
};
pub use pricing::{PricingError, PricingTable};
