use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone)]
pub enum PrefetchError {
    #[error("Network error: {source}")]
    Network {
        source: Arc<reqwest::Error>,
    },
    #[error("Server returned status code {0}")]
    Status(reqwest::StatusCode),
    #[error("Segment fetch error: {0}")]
    SegmentFetch(String),
    #[error("Invalid segment URL: {0}")]
    InvalidUrl(String),
    #[error(
        "Prefetch completed after its pending slot was evicted from the cache \
         (key {key}); consider raising `max_segments`"
    )]
    EvictedInFlight { key: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

// Manual implementation of From<reqwest::Error> for PrefetchError
// because of the Arc wrapping.
impl From<reqwest::Error> for PrefetchError {
    fn from(err: reqwest::Error) -> Self {
        PrefetchError::Network {
            source: Arc::new(err),
        }
    }
}
