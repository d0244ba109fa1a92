//! Client for the commercial US street-address API.
//!
//! One POST carries up to 100 lookups. Candidates come back as a flat list
//! tagged with the `input_index` of the lookup they answer; lookups with no
//! match simply have no candidates.

use std::future::Future;
use std::pin::Pin;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{SmartyConfig, SmartyCredentials};
use crate::error::PipelineError;
use crate::record::{Record, SchemaMap};
use crate::validation::address::address_text;
use crate::validation::http::{self, LoggingMode};
use crate::validation::{LookupResult, ValidationAdapter};

/// Lookups per request accepted by the service.
pub const SMARTY_MAX_BATCH: usize = 100;

const SERVICE: &str = "street-address API";

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StreetLookupRequest<'a> {
    street: &'a str,
    input_id: &'a str,
    candidates: u32,
}

/// One ranked match for a submitted lookup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreetCandidate {
    /// Position of the lookup in the request this candidate answers.
    pub input_index: usize,
    #[serde(default)]
    pub candidate_index: usize,
    #[serde(default)]
    pub input_id: Option<String>,
    #[serde(default)]
    pub delivery_point_barcode: Option<String>,
    #[serde(default)]
    pub components: StreetComponents,
}

/// Parsed address parts of a candidate. Absent parts are `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreetComponents {
    pub primary_number: Option<String>,
    pub street_name: Option<String>,
    pub street_suffix: Option<String>,
    pub secondary_number: Option<String>,
    pub secondary_designator: Option<String>,
    pub extra_secondary_number: Option<String>,
    pub extra_secondary_designator: Option<String>,
    pub city_name: Option<String>,
    pub state_abbreviation: Option<String>,
    pub zipcode: Option<String>,
    pub plus4_code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SmartyAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Street API adapter.
pub struct SmartyAdapter {
    http: reqwest::Client,
    base_url: Url,
    license_key: String,
    candidates: u32,
    credentials: SmartyCredentials,
    id_field: String,
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for SmartyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartyAdapter")
            .field("base_url", &http::sanitize_url_for_logs(&self.base_url, LoggingMode::PathOnly))
            .field("license_key", &self.license_key)
            .field("candidates", &self.candidates)
            .field("credentials", &"[REDACTED]")
            .finish()
    }
}

impl SmartyAdapter {
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the URL is invalid or credentials
    /// are not configured.
    pub fn new(config: &SmartyConfig, id_field: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            http: http::build_http_client()?,
            base_url: http::parse_base_url(&config.url, "street API url")?,
            license_key: config.license_key.clone(),
            candidates: config.candidates.max(1),
            credentials: config.credentials()?,
            id_field: id_field.to_string(),
            logging_mode: LoggingMode::default(),
        })
    }

    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    fn request_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("auth-id", self.credentials.auth_id.expose_secret())
            .append_pair("auth-token", self.credentials.auth_token.expose_secret())
            .append_pair("license", &self.license_key);
        url
    }

    async fn send_batch(
        &self,
        records: &[Record],
        schema_map: &SchemaMap,
    ) -> Result<Vec<LookupResult>, PipelineError> {
        if records.len() > SMARTY_MAX_BATCH {
            return Err(PipelineError::SubBatchOverCap {
                len: records.len(),
                cap: SMARTY_MAX_BATCH,
            });
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = records.iter().map(|r| address_text(r, schema_map)).collect();
        let ids: Vec<String> = records
            .iter()
            .map(|r| r.source_id(&self.id_field).unwrap_or_default())
            .collect();

        let body: Vec<StreetLookupRequest<'_>> = texts
            .iter()
            .zip(&ids)
            .map(|(street, input_id)| StreetLookupRequest {
                street,
                input_id,
                candidates: self.candidates,
            })
            .collect();

        let response =
            http::post_json(&self.http, self.request_url(), &body, "SMARTY", self.logging_mode)
                .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(http::parse_error_response(response, status, SERVICE).await);
        }

        let candidates: Vec<StreetCandidate> = http::decode_json(response, SERVICE).await?;
        debug!(
            lookups = records.len(),
            candidates = candidates.len(),
            "[SMARTY] Batch answered"
        );

        Ok(group_candidates(texts, candidates))
    }
}

/// Distributes the flat candidate list back onto its lookups, best first.
fn group_candidates(texts: Vec<String>, candidates: Vec<StreetCandidate>) -> Vec<LookupResult> {
    let mut grouped: Vec<Vec<StreetCandidate>> = vec![Vec::new(); texts.len()];
    for candidate in candidates {
        match grouped.get_mut(candidate.input_index) {
            Some(slot) => slot.push(candidate),
            None => warn!(
                input_index = candidate.input_index,
                "[SMARTY] Ignoring candidate for unknown input index"
            ),
        }
    }

    texts
        .into_iter()
        .zip(grouped)
        .map(|(address_text, mut candidates)| {
            candidates.sort_by_key(|c| c.candidate_index);
            LookupResult::Street {
                address_text,
                candidates,
            }
        })
        .collect()
}

impl ValidationAdapter for SmartyAdapter {
    fn name(&self) -> &'static str {
        "smarty"
    }

    fn max_batch_size(&self) -> usize {
        SMARTY_MAX_BATCH
    }

    fn lookup<'a>(
        &'a self,
        records: &'a [Record],
        schema_map: &'a SchemaMap,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupResult>, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            info!(lookups = records.len(), "[SMARTY] Sending batch");
            self.send_batch(records, schema_map).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema_map() -> SchemaMap {
        SchemaMap::new([("address_line1", "address1"), ("city", "city")])
    }

    fn record(id: &str, street: &str, city: &str) -> Record {
        [
            ("source_id", json!(id)),
            ("address1", json!(street)),
            ("city", json!(city)),
        ]
        .into_iter()
        .collect()
    }

    fn adapter(base: &str) -> SmartyAdapter {
        let config = SmartyConfig::new(&format!("{}/street-address", base), "us-core-cloud")
            .with_credentials("test-id", "test-token");
        SmartyAdapter::new(&config, "source_id").unwrap()
    }

    fn candidate_json(input_index: usize) -> serde_json::Value {
        json!({
            "input_index": input_index,
            "candidate_index": 0,
            "delivery_line_1": "123 Main St",
            "delivery_point_barcode": "941051234015",
            "components": {
                "primary_number": "123",
                "street_name": "Main",
                "street_suffix": "St",
                "city_name": "San Francisco",
                "state_abbreviation": "CA",
                "zipcode": "94105",
                "plus4_code": "1234"
            },
            "metadata": {"latitude": 37.79}
        })
    }

    #[tokio::test]
    async fn sends_lookups_with_credentials_in_query() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/street-address"))
            .and(query_param("auth-id", "test-id"))
            .and(query_param("auth-token", "test-token"))
            .and(query_param("license", "us-core-cloud"))
            .and(body_json(json!([
                {"street": "123 Main St SF", "input_id": "a1", "candidates": 1},
                {"street": "1 Nowhere Rd Atlantis", "input_id": "X", "candidates": 1}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([candidate_json(0)])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let records = vec![
            record("a1", "123 Main St", "SF"),
            record("X", "1 Nowhere Rd", "Atlantis"),
        ];
        let results = adapter(&mock_server.uri())
            .lookup(&records, &schema_map())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_valid());
        assert!(!results[1].is_valid());
        assert_eq!(results[1].address_text(), "1 Nowhere Rd Atlantis");

        match &results[0] {
            LookupResult::Street { candidates, .. } => {
                assert_eq!(candidates[0].components.city_name.as_deref(), Some("San Francisco"));
                assert_eq!(candidates[0].delivery_point_barcode.as_deref(), Some("941051234015"));
            }
            other => panic!("Expected street result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn candidates_are_grouped_by_input_index() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/street-address"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([candidate_json(2), candidate_json(0)])),
            )
            .mount(&mock_server)
            .await;

        let records = vec![
            record("a", "1 A St", "X"),
            record("b", "2 B St", "Y"),
            record("c", "3 C St", "Z"),
        ];
        let results = adapter(&mock_server.uri())
            .lookup(&records, &schema_map())
            .await
            .unwrap();

        let validity: Vec<bool> = results.iter().map(LookupResult::is_valid).collect();
        assert_eq!(validity, vec![true, false, true]);
    }

    #[tokio::test]
    async fn auth_failure_is_batch_local() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/street-address"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&mock_server)
            .await;

        let records = vec![record("a", "1 A St", "X")];
        let err = adapter(&mock_server.uri())
            .lookup(&records, &schema_map())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ValidationApi(_)));
        assert!(err.is_batch_local());
    }

    #[tokio::test]
    async fn over_cap_batch_is_rejected_before_sending() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let records: Vec<Record> = (0..=SMARTY_MAX_BATCH)
            .map(|i| record(&format!("id-{}", i), "1 A St", "X"))
            .collect();
        let err = adapter(&mock_server.uri())
            .lookup(&records, &schema_map())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SubBatchOverCap { len: 101, cap: 100 }));
        assert!(!err.is_batch_local());
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let results = adapter(&mock_server.uri())
            .lookup(&[], &schema_map())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let output = format!("{:?}", adapter("https://us-street.api.smartystreets.com"));
        assert!(!output.contains("test-token"));
        assert!(!output.contains("test-id"));
        assert!(output.contains("[REDACTED]"));
    }
}
