use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use lawnpeak_core::booking::ports::{AddressCandidate, AddressLookup};
use lawnpeak_core::config::AddressLookupConfig;
use lawnpeak_core::{Collaborator, CollaboratorError};

use crate::ClientSetupError;

const COLLABORATOR: Collaborator = Collaborator::AddressLookup;

/// Google Places style autocomplete and place-details lookup.
#[derive(Clone, Debug)]
pub struct PlacesAddressLookup {
    client: Client,
    base_url: String,
    api_key: SecretString,
    country: String,
}

#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    status: String,
    #[serde(default)]
    predictions: Vec<Prediction>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    description: String,
    place_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    result: Option<PlaceDetails>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceDetails {
    #[serde(default)]
    formatted_address: Option<String>,
}

impl PlacesAddressLookup {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        country: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientSetupError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into(), api_key, country: country.into() })
    }

    pub fn from_config(
        config: &AddressLookupConfig,
        timeout: Duration,
    ) -> Result<Self, ClientSetupError> {
        let api_key = config.api_key.clone().ok_or(ClientSetupError::MissingApiKey)?;
        Self::new(config.base_url.clone(), api_key, config.country.clone(), timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, CollaboratorError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(|error| CollaboratorError::Unavailable {
                collaborator: COLLABORATOR,
                message: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Unavailable {
                collaborator: COLLABORATOR,
                message: format!("address provider returned {}", response.status()),
            });
        }

        response.json::<T>().await.map_err(|error| CollaboratorError::Malformed {
            collaborator: COLLABORATOR,
            message: error.to_string(),
        })
    }
}

fn provider_status_error(status: &str, message: Option<String>) -> CollaboratorError {
    let message = match message {
        Some(detail) => format!("{status}: {detail}"),
        None => status.to_owned(),
    };
    warn!(event_name = "address_lookup.status", status = %status, "address provider refused request");
    CollaboratorError::Unavailable { collaborator: COLLABORATOR, message }
}

#[async_trait]
impl AddressLookup for PlacesAddressLookup {
    async fn suggest(&self, input: &str) -> Result<Vec<AddressCandidate>, CollaboratorError> {
        let components = format!("country:{}", self.country);
        let payload: AutocompleteResponse = self
            .fetch(
                "autocomplete/json",
                &[("input", input), ("types", "address"), ("components", components.as_str())],
            )
            .await?;

        match payload.status.as_str() {
            "OK" => Ok(payload
                .predictions
                .into_iter()
                .map(|prediction| AddressCandidate {
                    description: prediction.description,
                    place_id: prediction.place_id,
                })
                .collect()),
            "ZERO_RESULTS" => Ok(Vec::new()),
            other => Err(provider_status_error(other, payload.error_message)),
        }
    }

    async fn resolve(&self, candidate: &AddressCandidate) -> Result<String, CollaboratorError> {
        let payload: DetailsResponse = self
            .fetch(
                "details/json",
                &[("place_id", candidate.place_id.as_str()), ("fields", "formatted_address")],
            )
            .await?;

        if payload.status != "OK" {
            return Err(provider_status_error(&payload.status, payload.error_message));
        }

        payload
            .result
            .and_then(|details| details.formatted_address)
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| CollaboratorError::Malformed {
                collaborator: COLLABORATOR,
                message: "place details did not include a formatted address".to_owned(),
            })
    }
}
