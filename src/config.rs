//! Pipeline configuration.
//!
//! The configuration document is JSON, in the shape the external parameter
//! store hands to each invocation. Credentials may be inlined, but normally
//! come from environment variables so the document itself stays shareable.

use std::path::Path;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::error::PipelineError;
use crate::record::SchemaMap;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Transport payload ceiling in bytes.
pub const DEFAULT_SIZE_CEILING: usize = 256_000;

/// Records per validation call when neither the adapter nor the config says otherwise.
pub const DEFAULT_DISPATCH_CAP: usize = 100;

pub const SMARTY_AUTH_ID_ENV: &str = "ADDRVAL_SMARTY_AUTH_ID";
pub const SMARTY_AUTH_TOKEN_ENV: &str = "ADDRVAL_SMARTY_AUTH_TOKEN";
pub const LOCATION_API_KEY_ENV: &str = "ADDRVAL_LOCATION_API_KEY";

// ─────────────────────────────────────────────────────────────────────────────
// BatchMode
// ─────────────────────────────────────────────────────────────────────────────

/// Batching strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Every input chunk becomes one batch.
    ChunkSize,
    /// Chunks accumulate until the byte ceiling would be reached.
    MaxSize,
}

impl FromStr for BatchMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk_size" => Ok(BatchMode::ChunkSize),
            "max_size" => Ok(BatchMode::MaxSize),
            other => Err(PipelineError::InvalidBatchMode(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReaderConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Options for reading the delimited source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Rows per chunk.
    pub chunk_size: usize,
    /// Single-byte field delimiter.
    pub delimiter: String,
    /// Source text encoding label.
    pub encoding: String,
    /// Maximum data rows read in one run.
    pub limit_rows: u64,
    /// Tokens normalized to null.
    pub na_values: Vec<String>,
    /// Column holding the record's source identifier.
    pub id_field: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            delimiter: ",".to_string(),
            encoding: "utf-8".to_string(),
            limit_rows: 1_000_000,
            na_values: vec!["null".to_string(), "none".to_string()],
            id_field: "source_id".to_string(),
        }
    }
}

impl ReaderConfig {
    /// Sets the chunk size.
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows;
        self
    }

    /// Sets the row limit.
    pub fn limit_rows(mut self, rows: u64) -> Self {
        self.limit_rows = rows;
        self
    }

    /// Sets the delimiter.
    pub fn delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = delimiter.to_string();
        self
    }

    /// Sets the encoding label.
    pub fn encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    /// The delimiter as the single byte the CSV parser needs.
    pub fn delimiter_byte(&self) -> Result<u8, PipelineError> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(PipelineError::Config(format!(
                "delimiter must be a single byte, got {:?}",
                self.delimiter
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be greater than 0".into()));
        }
        self.delimiter_byte()?;
        crate::streaming::TextEncoding::from_label(&self.encoding)?;
        if self.id_field.trim().is_empty() {
            return Err(PipelineError::Config("id_field must not be empty".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which validation service to call, with its connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ValidatorConfig {
    /// Commercial batched street-address API.
    Smarty(SmartyConfig),
    /// Place-index text search (geocoding).
    Location(LocationConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartyConfig {
    pub url: String,
    pub license_key: String,
    #[serde(default = "default_candidates")]
    pub candidates: u32,
    #[serde(default)]
    auth_id: Option<SecretString>,
    #[serde(default)]
    auth_token: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub endpoint: String,
    pub place_index: String,
    #[serde(default = "default_candidates")]
    pub max_results: u32,
    #[serde(default)]
    api_key: Option<SecretString>,
}

fn default_candidates() -> u32 {
    1
}

/// Street API credentials, resolved from config or environment.
#[derive(Clone)]
pub struct SmartyCredentials {
    pub auth_id: SecretString,
    pub auth_token: SecretString,
}

impl SmartyConfig {
    pub fn new(url: &str, license_key: &str) -> Self {
        Self {
            url: url.to_string(),
            license_key: license_key.to_string(),
            candidates: default_candidates(),
            auth_id: None,
            auth_token: None,
        }
    }

    /// Sets inline credentials (tests and local runs).
    pub fn with_credentials(mut self, auth_id: &str, auth_token: &str) -> Self {
        self.auth_id = Some(SecretString::from(auth_id.to_string()));
        self.auth_token = Some(SecretString::from(auth_token.to_string()));
        self
    }

    /// Resolves credentials: inline value first, then environment.
    pub fn credentials(&self) -> Result<SmartyCredentials, PipelineError> {
        Ok(SmartyCredentials {
            auth_id: resolve_secret(self.auth_id.as_ref(), SMARTY_AUTH_ID_ENV)?,
            auth_token: resolve_secret(self.auth_token.as_ref(), SMARTY_AUTH_TOKEN_ENV)?,
        })
    }
}

impl LocationConfig {
    pub fn new(endpoint: &str, place_index: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            place_index: place_index.to_string(),
            max_results: default_candidates(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    /// Resolves the API key: inline value first, then environment.
    pub fn api_key(&self) -> Result<SecretString, PipelineError> {
        resolve_secret(self.api_key.as_ref(), LOCATION_API_KEY_ENV)
    }
}

/// Picks the inline secret if present and non-empty, else the named env var.
fn resolve_secret(
    inline: Option<&SecretString>,
    env_name: &str,
) -> Result<SecretString, PipelineError> {
    if let Some(value) = inline.filter(|v| !v.expose_secret().trim().is_empty()) {
        return Ok(value.clone());
    }

    match std::env::var(env_name) {
        Ok(value) if !value.trim().is_empty() => {
            info!("Credential loaded from environment variable {}", env_name);
            Ok(SecretString::from(value))
        }
        _ => Err(PipelineError::Config(format!(
            "credential not configured; set it inline or via {}",
            env_name
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PipelineConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Full configuration for one invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Raw batch mode string; parsed by `batch_mode()` so a bad value surfaces
    /// as `InvalidBatchMode` rather than a generic parse failure.
    #[serde(default = "default_batch_mode")]
    batch_mode: String,
    #[serde(default = "default_size_ceiling")]
    pub size_ceiling: usize,
    pub schema_map: SchemaMap,
    pub s3_bucket: String,
    pub s3_key: String,
    #[serde(default)]
    pub dispatch_cap: Option<usize>,
    pub validator: ValidatorConfig,
}

fn default_batch_mode() -> String {
    "chunk_size".to_string()
}

fn default_size_ceiling() -> usize {
    DEFAULT_SIZE_CEILING
}

impl PipelineConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// `batch_mode` replaces the document's value before validation, so an
    /// override rescues a file with a bad mode.
    pub fn load(path: &Path, batch_mode: Option<&str>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_with_batch_mode(&text, batch_mode)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        Self::from_json_with_batch_mode(text, None)
    }

    /// Parses a document, applies an optional batch mode override, then validates.
    pub fn from_json_with_batch_mode(
        text: &str,
        batch_mode: Option<&str>,
    ) -> Result<Self, PipelineError> {
        let mut config: PipelineConfig = serde_json::from_str(text)
            .map_err(|e| PipelineError::Config(format!("Invalid configuration: {}", e)))?;
        if let Some(mode) = batch_mode {
            config.set_batch_mode(mode);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn batch_mode(&self) -> Result<BatchMode, PipelineError> {
        self.batch_mode.parse()
    }

    pub fn set_batch_mode(&mut self, mode: &str) {
        self.batch_mode = mode.to_string();
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.reader.validate()?;
        self.batch_mode()?;
        if self.size_ceiling == 0 {
            return Err(PipelineError::Config("size_ceiling must be greater than 0".into()));
        }
        if self.schema_map.is_empty() {
            return Err(PipelineError::Config("schema_map must not be empty".into()));
        }
        if self.dispatch_cap == Some(0) {
            return Err(PipelineError::Config("dispatch_cap must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"{
        "reader": {"chunk_size": 50, "delimiter": "|", "limit_rows": 10},
        "batch_mode": "max_size",
        "schema_map": {
            "address_line1": "address1",
            "address_line2": "address2",
            "city": "city",
            "state": "state_code",
            "zip_code": "zip_code",
            "country": "country"
        },
        "s3_bucket": "id-res-data",
        "s3_key": "test-drive/synthetic_testData.csv-validated",
        "validator": {
            "provider": "smarty",
            "url": "https://us-street.api.smartystreets.com/street-address",
            "license_key": "us-core-cloud",
            "auth_id": "id-123",
            "auth_token": "token-456"
        }
    }"#;

    #[test]
    fn parses_full_document() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();

        assert_eq!(config.reader.chunk_size, 50);
        assert_eq!(config.reader.delimiter_byte().unwrap(), b'|');
        assert_eq!(config.reader.encoding, "utf-8");
        assert_eq!(config.reader.na_values, vec!["null", "none"]);
        assert_eq!(config.batch_mode().unwrap(), BatchMode::MaxSize);
        assert_eq!(config.size_ceiling, DEFAULT_SIZE_CEILING);
        assert_eq!(config.schema_map.len(), 6);
        assert_eq!(config.schema_map.iter().next(), Some(("address_line1", "address1")));
        assert!(config.dispatch_cap.is_none());
        assert!(matches!(config.validator, ValidatorConfig::Smarty(_)));
    }

    #[test]
    fn invalid_batch_mode_is_rejected() {
        let text = SAMPLE.replace("\"max_size\"", "\"fastest\"");
        let result = PipelineConfig::from_json(&text);
        assert!(matches!(result, Err(PipelineError::InvalidBatchMode(m)) if m == "fastest"));
    }

    #[test]
    fn batch_mode_override_replaces_bad_document_value() {
        let text = SAMPLE.replace("\"max_size\"", "\"fastest\"");

        let config = PipelineConfig::from_json_with_batch_mode(&text, Some("chunk_size")).unwrap();
        assert_eq!(config.batch_mode().unwrap(), BatchMode::ChunkSize);

        let result = PipelineConfig::from_json_with_batch_mode(SAMPLE, Some("fastest"));
        assert!(matches!(result, Err(PipelineError::InvalidBatchMode(m)) if m == "fastest"));
    }

    #[test]
    fn load_applies_override_before_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, SAMPLE.replace("\"max_size\"", "\"fastest\"")).unwrap();

        assert!(matches!(
            PipelineConfig::load(&path, None),
            Err(PipelineError::InvalidBatchMode(_))
        ));
        let config = PipelineConfig::load(&path, Some("max_size")).unwrap();
        assert_eq!(config.batch_mode().unwrap(), BatchMode::MaxSize);
    }

    #[test]
    fn batch_mode_parses_both_values() {
        assert_eq!("chunk_size".parse::<BatchMode>().unwrap(), BatchMode::ChunkSize);
        assert_eq!("max_size".parse::<BatchMode>().unwrap(), BatchMode::MaxSize);
        assert!("MAX_SIZE".parse::<BatchMode>().is_err());
    }

    #[test]
    fn multi_byte_delimiter_is_rejected() {
        let reader = ReaderConfig::default().delimiter("||");
        assert!(matches!(reader.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let reader = ReaderConfig::default().chunk_size(0);
        assert!(matches!(reader.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let reader = ReaderConfig::default().encoding("ebcdic");
        assert!(matches!(
            reader.validate(),
            Err(PipelineError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn empty_schema_map_is_rejected() {
        let mut doc: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        doc["schema_map"] = serde_json::json!({});
        assert!(matches!(
            PipelineConfig::from_json(&doc.to_string()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn inline_credentials_take_priority() {
        let smarty = SmartyConfig::new("https://example.com", "us-core-cloud")
            .with_credentials("inline-id", "inline-token");
        let creds = smarty.credentials().unwrap();
        assert_eq!(creds.auth_id.expose_secret(), "inline-id");
        assert_eq!(creds.auth_token.expose_secret(), "inline-token");
    }

    #[test]
    fn inline_secrets_deserialize_as_secret_strings() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();
        let ValidatorConfig::Smarty(smarty) = &config.validator else {
            panic!("Expected smarty validator");
        };
        let inline: &Option<SecretString> = &smarty.auth_token;
        assert_eq!(inline.as_ref().unwrap().expose_secret(), "token-456");
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("token-456"));
        assert!(!debug_output.contains("id-123"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn location_validator_parses() {
        let mut doc: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        doc["validator"] = serde_json::json!({
            "provider": "location",
            "endpoint": "https://places.geo.us-west-2.amazonaws.com",
            "place_index": "venice-address-validation",
            "api_key": "v1.public.abc"
        });
        let config = PipelineConfig::from_json(&doc.to_string()).unwrap();
        match config.validator {
            ValidatorConfig::Location(loc) => {
                assert_eq!(loc.place_index, "venice-address-validation");
                assert_eq!(loc.max_results, 1);
                assert_eq!(loc.api_key().unwrap().expose_secret(), "v1.public.abc");
            }
            other => panic!("Expected location validator, got {:?}", other),
        }
    }
}
