//! HTTP client for the remote history service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::error::{Error, Result};
use crate::remote::{RemoteClient, RemotePoint};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`RemoteClient`] over the history service's REST API.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
}

impl HttpRemoteClient {
    /// Create a client with the default request timeout.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the history service
    ///   (e.g. "http://localhost:8080")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_url(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::RemoteUnavailable {
                message: e.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    /// Create a client from a preconfigured reqwest `Client`.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: normalize_url(base_url)?,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_range(&self, series_id: &str, from: i64, to: i64) -> Result<Vec<RemotePoint>> {
        let url = format!("{}/api/series/{}/samples", self.base_url, series_id);
        let from_iso = to_rfc3339(from)?;
        let to_iso = to_rfc3339(to)?;

        debug!("Fetching {series_id} samples {from_iso}..{to_iso}");

        let response = self
            .client
            .get(&url)
            .query(&[("from", from_iso.as_str()), ("to", to_iso.as_str())])
            .send()
            .await
            .map_err(|e| Error::RemoteUnavailable {
                message: format!("{url}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());

            return Err(map_status(status, message));
        }

        let mut points: Vec<RemotePoint> =
            response.json().await.map_err(|e| Error::RemoteUnavailable {
                message: format!("{url}: {e}"),
            })?;

        // The service returns ascending order; sort anyway so downstream
        // merge logic never depends on the remote honoring that.
        points.sort_by_key(|p| p.timestamp);

        Ok(points)
    }
}

fn normalize_url(base_url: &str) -> Result<String> {
    let base_url = base_url.trim_end_matches('/').to_string();

    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(Error::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {base_url}"
        )));
    }

    Ok(base_url)
}

/// Classify a non-success HTTP status per the cache error model: client
/// errors are rejections (not retryable), everything else is transient.
fn map_status(status: StatusCode, message: String) -> Error {
    if status.is_client_error() {
        Error::RemoteRejected {
            message: format!("{status}: {message}"),
        }
    } else {
        Error::RemoteUnavailable {
            message: format!("{status}: {message}"),
        }
    }
}

fn to_rfc3339(ms: i64) -> Result<String> {
    let ts = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(
        |_| Error::RemoteRejected {
            message: format!("timestamp {ms} out of range"),
        },
    )?;
    ts.format(&Rfc3339).map_err(|e| Error::RemoteRejected {
        message: format!("timestamp {ms}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpRemoteClient::new("http://localhost:8080");
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_normalizes_url() {
        let client = HttpRemoteClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_invalid_url() {
        let result = HttpRemoteClient::new("localhost:8080");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_status_mapping() {
        let rejected = map_status(StatusCode::NOT_FOUND, "unknown series".into());
        assert!(matches!(rejected, Error::RemoteRejected { .. }));

        let bad_request = map_status(StatusCode::BAD_REQUEST, "bad range".into());
        assert!(matches!(bad_request, Error::RemoteRejected { .. }));

        let server_error = map_status(StatusCode::BAD_GATEWAY, "upstream down".into());
        assert!(matches!(server_error, Error::RemoteUnavailable { .. }));
        assert!(server_error.is_transient());
    }

    #[test]
    fn test_to_rfc3339() {
        assert_eq!(to_rfc3339(1_700_000_000_000).unwrap(), "2023-11-14T22:13:20Z");
        assert_eq!(to_rfc3339(0).unwrap(), "1970-01-01T00:00:00Z");
    }
}
