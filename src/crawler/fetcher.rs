//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the ingest engine:
//! - Building HTTP clients with proper user agent strings
//! - GET requests with bounded redirect following
//! - Classifying failures as transient or permanent for the job queue

use crate::config::UserAgentConfig;
use crate::job::JobFailure;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// Cooldown applied after HTTP 429 when the server sends no Retry-After
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Maximum number of redirects followed for a single fetch
const MAX_REDIRECTS: usize = 10;

/// A fetched document
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects; relative links resolve against it
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Retrieves the bytes behind a URL
///
/// Implementations report failures as [`JobFailure`]s so the worker can hand
/// them straight to the queue. A failure carrying `retry_after` also makes the
/// rate limiter back off the host.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument, JobFailure>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use sumi_ingest::config::UserAgentConfig;
/// use sumi_ingest::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiIngest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by reqwest
///
/// # Failure classification
///
/// | Condition | Failure |
/// |-----------|---------|
/// | HTTP 404, 410 | permanent |
/// | HTTP 429 | transient, with Retry-After (default 30s) |
/// | HTTP 5xx | transient |
/// | Other HTTP 4xx | permanent |
/// | Timeout, connection error | transient |
/// | Too many redirects | permanent |
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(config)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument, JobFailure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &response));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobFailure::transient(format!("Failed to read body of {}: {}", url, e)))?;

        Ok(FetchedDocument {
            final_url,
            status: status.as_u16(),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// Maps a non-success HTTP status to a job failure
fn classify_status(status: StatusCode, response: &Response) -> JobFailure {
    let message = format!("HTTP {} for {}", status, response.url());

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => JobFailure::permanent(message),
        StatusCode::TOO_MANY_REQUESTS => {
            let wait = retry_after(response).unwrap_or(DEFAULT_RETRY_AFTER);
            JobFailure::transient(message).with_retry_after(wait)
        }
        s if s.is_server_error() => {
            let failure = JobFailure::transient(message);
            match retry_after(response) {
                Some(wait) => failure.with_retry_after(wait),
                None => failure,
            }
        }
        _ => JobFailure::permanent(message),
    }
}

/// Reads a Retry-After header given in seconds
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_request_error(error: &reqwest::Error) -> JobFailure {
    if error.is_redirect() {
        JobFailure::permanent(format!("Redirect error: {}", error))
    } else if error.is_builder() {
        JobFailure::permanent(format!("Invalid request: {}", error))
    } else if error.is_timeout() {
        JobFailure::transient("Request timeout")
    } else if error.is_connect() {
        JobFailure::transient(format!("Connection failed: {}", error))
    } else {
        JobFailure::transient(error.to_string())
    }
}
