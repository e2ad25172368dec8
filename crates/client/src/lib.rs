//! HTTP adapters for the booking backend and the address lookup provider.

pub mod api;
pub mod places;

use thiserror::Error;

pub use api::HttpBookingApi;
pub use places::PlacesAddressLookup;

#[derive(Debug, Error)]
pub enum ClientSetupError {
    #[error("could not build http client: {0}")]
    Build(#[from] reqwest::Error),
    #[error("address lookup is enabled but no api key is configured")]
    MissingApiKey,
}
