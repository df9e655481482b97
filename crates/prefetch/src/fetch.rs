// Segment transport: raw download of individual media segments with retry logic.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::PrefetchError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Fetch primitive injected into the cache: given a segment URL,
/// asynchronously returns the response bytes or fails with an error.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    async fn fetch_segment(&self, url: &str) -> Result<Bytes, PrefetchError>;
}

/// Configuration for the HTTP segment fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-request timeout for a single download attempt.
    pub segment_timeout: Duration,

    /// How many times a retryable failure (connect/timeout/5xx) is retried.
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts.
    pub retry_delay_base: Duration,

    /// User agent string
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            segment_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay_base: Duration::from_millis(500),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &FetcherConfig) -> Result<Client, PrefetchError> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate"),
    );
    default_headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );

    Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to same host
        .user_agent(&config.user_agent)
        .default_headers(default_headers)
        .build()
        .map_err(PrefetchError::from)
}

/// HTTP implementation of the fetch primitive.
pub struct HttpSegmentFetcher {
    http_client: Client,
    config: FetcherConfig,
}

impl HttpSegmentFetcher {
    pub fn new(http_client: Client, config: FetcherConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Build a fetcher with default configuration and its own client.
    pub fn with_defaults() -> Result<Self, PrefetchError> {
        let config = FetcherConfig::default();
        let client = create_client(&config)?;
        Ok(Self::new(client, config))
    }

    /// Fetches a segment with retry logic.
    /// Retries on network errors and server errors (5xx).
    async fn fetch_with_retries(&self, segment_url: &Url) -> Result<Bytes, PrefetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut request_builder = self.http_client.get(segment_url.clone());
            if !self.config.segment_timeout.is_zero() {
                request_builder = request_builder.timeout(self.config.segment_timeout);
            }

            match request_builder.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.bytes().await.map_err(PrefetchError::from);
                    } else if response.status().is_client_error() {
                        // Non-retryable client errors (4xx)
                        return Err(PrefetchError::Status(response.status()));
                    }
                    // Server errors (5xx) or other retryable issues
                    if attempts > self.config.max_retries {
                        return Err(PrefetchError::SegmentFetch(format!(
                            "Max retries ({}) exceeded for segment {}. Last status: {}",
                            self.config.max_retries,
                            segment_url,
                            response.status()
                        )));
                    }
                }
                Err(e) => {
                    if !e.is_connect() && !e.is_timeout() && !e.is_request() {
                        // Non-retryable network errors
                        return Err(PrefetchError::from(e));
                    }
                    if attempts > self.config.max_retries {
                        return Err(PrefetchError::SegmentFetch(format!(
                            "Max retries ({}) exceeded for segment {} due to network error: {e}",
                            self.config.max_retries, segment_url
                        )));
                    }
                }
            }

            let delay = self.config.retry_delay_base * 2_u32.pow(attempts.saturating_sub(1));
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SegmentFetcher for HttpSegmentFetcher {
    async fn fetch_segment(&self, url: &str) -> Result<Bytes, PrefetchError> {
        let segment_url =
            Url::parse(url).map_err(|e| PrefetchError::InvalidUrl(format!("{url}: {e}")))?;

        debug!(url = %segment_url, "fetching segment");
        self.fetch_with_retries(&segment_url).await
    }
}
