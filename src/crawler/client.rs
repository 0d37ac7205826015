//! Remote query client
//!
//! This module handles all HTTP requests to the search backend, including:
//! - Building HTTP clients with the configured headers and timeouts
//! - GET requests with query parameters
//! - In-client retries with exponential backoff
//! - Error classification

use crate::config::{ApiConfig, RetryConfig};
use crate::ErrorKind;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Failure of a request to the search backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl QueryError {
    /// Classifies a reqwest error the same way for every request
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else if error.is_body() || error.is_decode() {
            Self::Body(error.to_string())
        } else {
            Self::Request(error.to_string())
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Connect(_) | Self::Request(_) => ErrorKind::Connection,
            Self::Status { .. } => ErrorKind::HttpStatus,
            Self::Body(_) => ErrorKind::Protocol,
        }
    }

    /// Returns true for timeouts and connection failures
    pub fn is_transport(&self) -> bool {
        self.kind().is_transport()
    }
}

/// Builds an HTTP client with the backend's headers and timeouts
///
/// # Arguments
///
/// * `config` - The search backend configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use fare_sweep::config::ApiConfig;
/// use fare_sweep::crawler::build_http_client;
///
/// let client = build_http_client(&ApiConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(default_headers(config))
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

fn default_headers(config: &ApiConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    if let Some(referer) = config.referer.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(REFERER, referer);
    }
    if let Some(origin) = config.origin.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(ORIGIN, origin);
    }

    for (name, value) in &config.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header '{}'", name),
        }
    }

    headers
}

/// A client for the search backend, owned by one task execution
pub struct ApiClient {
    client: Client,
    base_url: String,
    attempts: u32,
    interval: Duration,
    backoff_factor: f64,
}

impl ApiClient {
    /// Creates a client from the backend and retry configuration
    pub fn new(api: &ApiConfig, retry: &RetryConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(api)?,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            attempts: api.request_attempts.max(1),
            interval: retry.interval(),
            backoff_factor: retry.backoff_factor,
        })
    }

    /// Absolute URL of a backend path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends a GET request and returns the body of a 200 response
    ///
    /// Any failure is retried up to the configured number of attempts, with
    /// `interval * backoff_factor ^ attempt` between attempts. The last
    /// failure is returned.
    pub async fn get(&self, url: &str, params: &[(&str, String)]) -> Result<String, QueryError> {
        let mut attempt = 0u32;
        loop {
            match self.get_once(url, params).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.attempts {
                        tracing::error!(
                            "Giving up on {} after {} attempts: {} (params: {:?})",
                            url,
                            attempt,
                            e,
                            params
                        );
                        return Err(e);
                    }

                    let wait = self.backoff(attempt - 1);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}, retrying in {:.2}s",
                        attempt,
                        self.attempts,
                        e,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn get_once(&self, url: &str, params: &[(&str, String)]) -> Result<String, QueryError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(QueryError::from_reqwest)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(QueryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(QueryError::from_reqwest)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}
