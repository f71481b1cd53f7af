//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous API client wrapper around `reqwest`.
//! Every request carries a fixed set of default headers (API key, tenant
//! identifier, content type) and fails fast: a non-2xx status is turned into
//! a [`FetchError::Status`] immediately, without retrying. Retries, if any,
//! belong to whatever schedules the extraction.

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default per-request timeout applied by [`ApiClient::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while fetching JSON documents from a REST API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The base URL or a joined path could not be parsed.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL or path.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A default header value contains characters HTTP does not allow.
    #[error("Invalid value for header '{name}': {reason}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Parser message.
        reason: String,
    },

    /// Connection, TLS or timeout failure reported by `reqwest`.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status code.
    #[error("HTTP request to {url} failed with status {status}: {body}")]
    Status {
        /// Numeric HTTP status.
        status: u16,
        /// Absolute URL that was requested.
        url: String,
        /// Raw response body, kept for post-mortem analysis.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response from {url}: {reason}")]
    Decode {
        /// Absolute URL or endpoint path.
        url: String,
        /// What was wrong with the document.
        reason: String,
    },

    /// The server reported a next page that does not move past the current one.
    #[error("Pagination of {path} stalled: page {page} reported next page {next_page}")]
    StalledCursor {
        /// Endpoint path being paginated.
        path: String,
        /// Page that was just fetched.
        page: u64,
        /// Value found in `meta.pagination.next_page`.
        next_page: u64,
    },
}

/// A standardized container for API responses.
///
/// This struct wraps the decoded body along with the status and URL of the
/// HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse {
    /// The decoded JSON body. `Value::Null` when the request failed.
    pub data: Value,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The absolute URL that was requested, query string included.
    pub url: String,
}

impl ApiResponse {
    /// Converts a failed response into [`FetchError::Status`], passing successful ones through.
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.success {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                url: self.url,
                body: self.error_body.unwrap_or_default(),
            })
        }
    }
}

/// Something that can GET a JSON document from a path relative to a base URL.
///
/// [`ApiClient`] is the production implementation; the paginated fetch stream and
/// the REST sources are generic over this trait so they can be driven by canned
/// responses in tests.
pub trait JsonFetch {
    /// Issues one GET request and returns the decoded body of a 2xx response.
    ///
    /// Any non-success status must be reported as [`FetchError::Status`].
    fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

/// A flexible asynchronous HTTP client.
///
/// Handles the base URL, the default headers shared by every request and the
/// request timeout.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The underlying client.
    inner: reqwest::Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// Headers sent with every request.
    default_headers: HeaderMap,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    ///   A trailing slash is added when missing so relative paths join underneath it.
    /// * `default_headers` - Headers sent with every request.
    /// * `timeout` - Per-request timeout.
    pub fn new(
        base_url: &str,
        default_headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let url = Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let inner = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner,
            base_url: url,
            default_headers,
        })
    }

    /// The base URL every path is joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs an HTTP request and captures the response.
    ///
    /// Non-success responses are returned as `Ok` with `success == false`; use
    /// [`ApiResponse::error_for_status`] to turn them into errors.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb.
    /// * `path` - The relative path to append to the base URL.
    /// * `query` - Query string parameters.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse, FetchError> {
        let full_url = self.base_url.join(path).map_err(|e| FetchError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .inner
            .request(method, full_url)
            .headers(self.default_headers.clone())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        debug!(%url, status = status.as_u16(), "HTTP response received");

        if status.is_success() {
            let data = response.json::<Value>().await?;
            Ok(ApiResponse {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
                url,
            })
        } else {
            // Capture the error body as a string for debugging
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: Value::Null,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                url,
            })
        }
    }
}

impl JsonFetch for ApiClient {
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let response = self.request(Method::GET, path, query).await?.error_for_status()?;
        Ok(response.data)
    }
}
