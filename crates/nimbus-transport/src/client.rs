//! REST file API client
//!
//! Typed HTTP client for the Nimbus file service. Handles bearer
//! authentication, endpoint construction, and the mapping from HTTP
//! status codes and transport failures onto the [`SyncError`] taxonomy,
//! so the engine's retry classification sees real error kinds instead of
//! rendered strings.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use nimbus_core::domain::SyncError;

/// Request timeout for metadata calls; transfers use reqwest's default
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// RestClient
// ============================================================================

/// HTTP client for the file service API
///
/// Wraps `reqwest::Client` with the service base URL and a bearer token.
/// All responses go through [`RestClient::check_status`] so callers get
/// taxonomy errors, never raw status codes.
pub struct RestClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl RestClient {
    /// Creates a client for the given service URL and access token
    ///
    /// # Errors
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Replaces the access token after a refresh
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Access token updated");
    }

    /// Service base URL, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authenticated request builder for a path relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Sends a built request and maps failures onto the error taxonomy
    ///
    /// Transport-level failures become [`SyncError::ConnectionTimeout`] or
    /// [`SyncError::NetworkUnavailable`]; error statuses go through
    /// [`Self::check_status`].
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(classify_transport_error)?;
        self.check_status(response).await
    }

    /// Convenience for body-less calls
    pub async fn send(&self, method: Method, path: &str) -> Result<Response> {
        self.execute(self.request(method, path)).await
    }

    /// Maps an error status onto a [`SyncError`]; passes success through
    ///
    /// The response body is read for error statuses so the message can be
    /// attached as context.
    pub async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let detail = response.text().await.unwrap_or_default();

        let err = match status {
            StatusCode::NOT_FOUND => SyncError::NotFound(detail),
            StatusCode::CONFLICT => SyncError::AlreadyExists(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SyncError::PermissionDenied(detail)
            }
            StatusCode::PAYLOAD_TOO_LARGE | StatusCode::INSUFFICIENT_STORAGE => {
                SyncError::InsufficientSpace(detail)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Service throttled the request"
                );
                SyncError::RateLimited
            }
            s if s.is_server_error() => SyncError::ServerError(s.as_u16()),
            s => {
                return Err(anyhow::anyhow!("unexpected status {s}: {detail}"));
            }
        };
        Err(err.into())
    }
}

/// Maps a reqwest failure onto the taxonomy
fn classify_transport_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        return anyhow::Error::new(err).context(SyncError::ConnectionTimeout);
    }
    if err.is_connect() {
        return anyhow::Error::new(err).context(SyncError::NetworkUnavailable);
    }
    anyhow::Error::new(err).context("HTTP request failed")
}

/// Parses a `Retry-After` header value
///
/// Accepts both forms the header allows: a delay in whole seconds, or an
/// HTTP-date after which the client may retry.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod retry_after_tests {
        use super::*;

        #[test]
        fn test_seconds_form() {
            assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
            assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        }

        #[test]
        fn test_http_date_form() {
            let at = Utc::now() + chrono::Duration::seconds(90);
            let parsed = parse_retry_after(&at.to_rfc2822()).expect("parses");
            // Allow a little slack for the time between formatting and parsing
            assert!(parsed.as_secs() >= 85 && parsed.as_secs() <= 90);
        }

        #[test]
        fn test_past_date_means_no_wait() {
            let at = Utc::now() - chrono::Duration::seconds(90);
            assert_eq!(parse_retry_after(&at.to_rfc2822()), Some(Duration::ZERO));
        }

        #[test]
        fn test_garbage_is_rejected() {
            assert_eq!(parse_retry_after("soon"), None);
            assert_eq!(parse_retry_after(""), None);
        }
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn test_request_url_and_auth_header() {
            let client = RestClient::new("http://localhost:9000/", "secret").unwrap();
            let request = client
                .request(Method::GET, "/files/a.txt")
                .build()
                .unwrap();
            assert_eq!(request.url().as_str(), "http://localhost:9000/files/a.txt");
            let auth = request
                .headers()
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap();
            assert_eq!(auth, "Bearer secret");
        }

        #[test]
        fn test_trailing_slash_is_normalized() {
            let client = RestClient::new("http://localhost:9000///", "t").unwrap();
            assert_eq!(client.base_url(), "http://localhost:9000");
        }
    }
}
