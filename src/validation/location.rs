//! Client for place-index text search (geocoding).
//!
//! The service has no batch endpoint: each record is one request for the
//! single best match. A match only counts when its relevance reaches
//! [`RELEVANCE_THRESHOLD`](crate::validation::RELEVANCE_THRESHOLD).

use std::future::Future;
use std::pin::Pin;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{LocationConfig, DEFAULT_DISPATCH_CAP};
use crate::error::PipelineError;
use crate::record::{Record, SchemaMap};
use crate::validation::address::address_text;
use crate::validation::http::{self, LoggingMode};
use crate::validation::{LookupResult, ValidationAdapter};

const SERVICE: &str = "place index";

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchPlaceIndexRequest<'a> {
    text: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchPlaceIndexResponse {
    #[serde(default)]
    results: Vec<PlaceResult>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaceResult {
    #[serde(default)]
    pub place: Place,
    #[serde(default)]
    pub place_id: Option<String>,
    /// Match confidence in `[0, 1]`. Missing scores count as zero.
    #[serde(default)]
    pub relevance: f64,
}

/// Address parts of a place. Unit parts are often absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Place {
    pub label: Option<String>,
    pub address_number: Option<String>,
    pub street: Option<String>,
    pub unit_type: Option<String>,
    pub unit_number: Option<String>,
    pub municipality: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// LocationAdapter
// ─────────────────────────────────────────────────────────────────────────────

pub struct LocationAdapter {
    http: reqwest::Client,
    search_url: Url,
    max_results: u32,
    api_key: SecretString,
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for LocationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationAdapter")
            .field("search_url", &http::sanitize_url_for_logs(&self.search_url, LoggingMode::PathOnly))
            .field("max_results", &self.max_results)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl LocationAdapter {
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the endpoint is invalid or the API
    /// key is not configured.
    pub fn new(config: &LocationConfig) -> Result<Self, PipelineError> {
        let endpoint = http::parse_base_url(&config.endpoint, "place index endpoint")?;
        let search_url = endpoint
            .join(&format!(
                "places/v0/indexes/{}/search/text",
                config.place_index
            ))
            .map_err(|e| {
                PipelineError::Config(format!(
                    "Invalid place index '{}': {}",
                    config.place_index, e
                ))
            })?;

        Ok(Self {
            http: http::build_http_client()?,
            search_url,
            max_results: config.max_results.max(1),
            api_key: config.api_key()?,
            logging_mode: LoggingMode::default(),
        })
    }

    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    fn request_url(&self) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        url
    }

    async fn search(&self, text: String) -> Result<LookupResult, PipelineError> {
        let body = SearchPlaceIndexRequest {
            text: &text,
            max_results: self.max_results,
        };

        let response =
            http::post_json(&self.http, self.request_url(), &body, "LOCATION", self.logging_mode)
                .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(http::parse_error_response(response, status, SERVICE).await);
        }

        let parsed: SearchPlaceIndexResponse = http::decode_json(response, SERVICE).await?;
        let result = parsed.results.into_iter().next();
        debug!(
            relevance = result.as_ref().map(|r| r.relevance),
            "[LOCATION] Search answered"
        );

        Ok(LookupResult::Place {
            address_text: text,
            result,
        })
    }
}

impl ValidationAdapter for LocationAdapter {
    fn name(&self) -> &'static str {
        "location"
    }

    fn max_batch_size(&self) -> usize {
        DEFAULT_DISPATCH_CAP
    }

    fn lookup<'a>(
        &'a self,
        records: &'a [Record],
        schema_map: &'a SchemaMap,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupResult>, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            info!(lookups = records.len(), "[LOCATION] Searching records");
            let mut results = Vec::with_capacity(records.len());
            for record in records {
                results.push(self.search(address_text(record, schema_map)).await?);
            }
            Ok(results)
        })
    }
}
