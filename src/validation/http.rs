//! HTTP plumbing shared by the validation service clients.
//!
//! Both services authenticate with query-string credentials, so every URL
//! that reaches a log line goes through `sanitize_url_for_logs` first.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::PipelineError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all validation service requests.
const CLIENT_USER_AGENT: &str = concat!("addrval/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Longest error body excerpt carried into an error message.
const ERROR_BODY_EXCERPT: usize = 200;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "auth-id",
    "auth-token",
    "key",
    "token",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component.
    /// Example: `/street-address`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/street-address?auth-id=***&auth-token=***&license=us-core-cloud`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// # Returns
///
/// A string safe for logging that never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client + requests
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the HTTP client used by both services.
pub fn build_http_client() -> Result<reqwest::Client, PipelineError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| PipelineError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Parses a base URL from configuration.
pub fn parse_base_url(raw: &str, what: &str) -> Result<Url, PipelineError> {
    Url::parse(raw).map_err(|e| PipelineError::Config(format!("Invalid {} '{}': {}", what, raw, e)))
}

/// POSTs a JSON body and logs method, sanitized path, status and latency.
///
/// Transport failures are mapped to `ConnectionFailed` without the raw
/// reqwest error, which may echo the full URL.
pub async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: Url,
    body: &B,
    tag: &str,
    mode: LoggingMode,
) -> Result<reqwest::Response, PipelineError> {
    let start = Instant::now();
    let sanitized_url = sanitize_url_for_logs(&url, mode);

    let result = client.post(url).json(body).send().await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(response) => {
            info!(
                "[{}] POST {} {} {}ms",
                tag,
                sanitized_url,
                response.status().as_u16(),
                duration_ms
            );
            Ok(response)
        }
        Err(e) => {
            info!("[{}] POST {} FAILED {}ms", tag, sanitized_url, duration_ms);
            let reason = if e.is_timeout() { "timed out" } else { "request failed" };
            Err(PipelineError::ConnectionFailed(format!(
                "{} {} ({})",
                tag, sanitized_url, reason
            )))
        }
    }
}

/// Converts a non-success response into a `PipelineError`.
pub async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
    service: &str,
) -> PipelineError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return PipelineError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));
    let excerpt: String = body.trim().chars().take(ERROR_BODY_EXCERPT).collect();

    PipelineError::ValidationApi(format!(
        "{} returned HTTP {}: {}",
        service,
        status.as_u16(),
        excerpt
    ))
}

/// Reads a success body as JSON.
pub async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    service: &str,
) -> Result<T, PipelineError> {
    let body = response
        .bytes()
        .await
        .map_err(|_| PipelineError::ConnectionFailed(format!("{} response body was cut off", service)))?;
    serde_json::from_slice(&body).map_err(|e| {
        PipelineError::ValidationApi(format!("{} returned an unreadable body: {}", service, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn path_only_excludes_query_string() {
        let url = Url::parse(
            "https://us-street.api.smartystreets.com/street-address?auth-id=abc&auth-token=def",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/street-address");
        assert!(!result.contains("abc"));
        assert!(!result.contains("smartystreets.com"));
    }

    #[test]
    fn path_and_query_redacted_redacts_credentials() {
        let url = Url::parse(
            "https://example.com/street-address?auth-id=abc&Auth-Token=def&license=us-core-cloud",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.contains("auth-id=***"));
        assert!(result.contains("Auth-Token=***"));
        assert!(result.contains("license=us-core-cloud"));
        assert!(!result.contains("abc"));
        assert!(!result.contains("def"));
    }

    #[test]
    fn api_key_is_redacted() {
        let url = Url::parse("https://places.example.com/places/v0/indexes/idx/search/text?key=v1.public.xyz").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert_eq!(result, "/places/v0/indexes/idx/search/text?key=***");
    }

    #[test]
    fn sensitive_param_requires_exact_match() {
        assert!(is_sensitive_param("KEY"));
        assert!(!is_sensitive_param("license"));
        assert!(!is_sensitive_param("keys"));
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        assert!(matches!(
            parse_base_url("not a url", "endpoint"),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lookup"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let client = build_http_client().unwrap();
        let url = Url::parse(&format!("{}/lookup", mock_server.uri())).unwrap();
        let response = post_json(&client, url, &[1, 2], "TEST", LoggingMode::PathOnly)
            .await
            .unwrap();
        let status = response.status();
        let err = parse_error_response(response, status, "test").await;

        assert!(matches!(
            err,
            PipelineError::RateLimited { retry_after_secs: Some(30) }
        ));
    }

    #[tokio::test]
    async fn server_error_carries_body_excerpt() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lookup"))
            .respond_with(ResponseTemplate::new(402).set_body_string("Payment Required: no active subscription"))
            .mount(&mock_server)
            .await;

        let client = build_http_client().unwrap();
        let url = Url::parse(&format!("{}/lookup", mock_server.uri())).unwrap();
        let response = post_json(&client, url, &[1], "TEST", LoggingMode::PathOnly)
            .await
            .unwrap();
        let status = response.status();
        let err = parse_error_response(response, status, "test").await;

        match err {
            PipelineError::ValidationApi(msg) => {
                assert!(msg.contains("402"));
                assert!(msg.contains("no active subscription"));
            }
            other => panic!("Expected ValidationApi, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_failure() {
        let client = build_http_client().unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let url = Url::parse("http://127.0.0.1:9/lookup?auth-token=secret").unwrap();

        let err = post_json(&client, url, &[1], "TEST", LoggingMode::PathOnly)
            .await
            .unwrap_err();

        match err {
            PipelineError::ConnectionFailed(msg) => assert!(!msg.contains("secret")),
            other => panic!("Expected ConnectionFailed, got {:?}", other),
        }
    }
}
