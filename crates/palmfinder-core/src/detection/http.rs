//! HTTP Detection Client
//!
//! reqwest-based client for the detection service. One multipart submission
//! per detection; responses are parsed into explicit wire types and resolved
//! with a fixed locator preference (`output_url`, then `output_path` on the
//! video endpoint).

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{DetectionClient, ServiceHealth};
use crate::settings::ServiceSettings;
use crate::{CoreError, CoreResult, DetectionResult, MediaKind, MediaReference};

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default upload limit (the service rejects bodies above 32 MiB)
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

/// Maximum number of body characters quoted in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

// =============================================================================
// API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default)]
    output_path: Option<String>,
}

impl DetectResponse {
    /// Resolves the output locator: `output_url` first, then (where the
    /// endpoint allows it) `output_path`. Empty strings count as absent.
    fn locator(&self, kind: MediaKind) -> Option<&str> {
        non_empty(&self.output_url).or_else(|| {
            if kind.allows_output_path() {
                non_empty(&self.output_path)
            } else {
                None
            }
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Default, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    environment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Parses a success body from a detection endpoint
fn parse_detect_response(kind: MediaKind, body: &str) -> CoreResult<DetectionResult> {
    let parsed: DetectResponse = serde_json::from_str(body)
        .map_err(|e| CoreError::ProtocolError(format!("Malformed detection response: {}", e)))?;

    let count = parsed.count.ok_or_else(|| {
        CoreError::ProtocolError("Detection response is missing 'count'".to_string())
    })?;

    let locator = parsed.locator(kind).ok_or_else(|| {
        let expected = if kind.allows_output_path() {
            "'output_url' or 'output_path'"
        } else {
            "'output_url'"
        };
        CoreError::ProtocolError(format!("Detection response is missing {}", expected))
    })?;

    Ok(DetectionResult::new(count, locator))
}

/// Builds the error for a non-success status
fn parse_service_error(status: StatusCode, body: &str) -> CoreError {
    if let Ok(err_resp) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = err_resp.error {
            return CoreError::NetworkError(format!("Service error ({}): {}", status, message));
        }
    }

    let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if truncated.trim().is_empty() {
        CoreError::NetworkError(format!("Service error ({})", status))
    } else {
        CoreError::NetworkError(format!("Service error ({}): {}", status, truncated))
    }
}

// =============================================================================
// HttpDetectionClient
// =============================================================================

/// Detection client talking to the service over HTTP
pub struct HttpDetectionClient {
    /// HTTP client with configured timeout
    client: reqwest::Client,
    /// Base URL of the service (no trailing slash)
    base_url: String,
    /// Largest upload sent to the service
    max_upload_bytes: u64,
}

impl std::fmt::Debug for HttpDetectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDetectionClient")
            .field("base_url", &self.base_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

impl HttpDetectionClient {
    /// Creates a new client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> CoreResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a new client with an explicit request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        })
    }

    /// Creates a client from service settings
    pub fn from_settings(settings: &ServiceSettings) -> CoreResult<Self> {
        Ok(
            Self::with_timeout(&settings.base_url, Duration::from_secs(settings.timeout_sec))?
                .with_max_upload_bytes(settings.max_upload_bytes()),
        )
    }

    /// Sets the upload limit
    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the detection URL for a media kind
    fn detect_url(&self, kind: MediaKind) -> String {
        format!("{}{}", self.base_url, kind.endpoint_path())
    }

    /// Build the health URL
    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    /// Reads the referenced media, refusing files above the upload limit
    async fn read_media(&self, source: &MediaReference) -> CoreResult<Vec<u8>> {
        let path = source.path();
        let size = tokio::fs::metadata(&path).await?.len();
        if size > self.max_upload_bytes {
            return Err(CoreError::PayloadTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        Ok(tokio::fs::read(&path).await?)
    }
}

#[async_trait]
impl DetectionClient for HttpDetectionClient {
    async fn detect(&self, source: &MediaReference) -> CoreResult<DetectionResult> {
        let kind = source.kind;
        let bytes = self.read_media(source).await?;
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(kind.upload_file_name())
            .mime_str(kind.content_type())
            .map_err(|e| CoreError::Internal(format!("Invalid content type: {}", e)))?;
        let form = Form::new().part(kind.field_name(), part);

        let url = self.detect_url(kind);
        info!("Submitting {} ({} bytes) to {}", kind, size, url);

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::NetworkError(format!("Failed to reach {}: {}", url, e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::NetworkError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(parse_service_error(status, &body));
        }

        let result = parse_detect_response(kind, &body)?;
        info!(
            "Detection finished: count={}, output={}",
            result.count, result.output_locator
        );
        Ok(result)
    }

    async fn check_health(&self) -> CoreResult<ServiceHealth> {
        let url = self.health_url();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::NetworkError(format!("Backend not reachable: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::NetworkError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(parse_service_error(status, &body));
        }

        let parsed = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => serde_json::from_value::<HealthResponse>(value).unwrap_or_default(),
            Err(e) => {
                return Err(CoreError::ProtocolError(format!(
                    "Health response is not JSON: {}",
                    e
                )))
            }
        };

        debug!("Health check ok: status={:?}", parsed.status);
        Ok(ServiceHealth {
            status: parsed.status,
            environment: parsed.environment,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
