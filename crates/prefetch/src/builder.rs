//! # Builder for SegmentCacheConfig
//!
//! Fluent API for creating and customizing `SegmentCacheConfig` instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use prefetch_engine::{KeyStrategy, SegmentCacheConfig};
//!
//! let config = SegmentCacheConfig::builder()
//!     .with_max_segments(50)
//!     .with_key_strategy(KeyStrategy::Filename)
//!     .with_keyset_dump_interval(Duration::from_secs(5))
//!     .build();
//! ```

use std::time::Duration;

use crate::config::SegmentCacheConfig;
use crate::key::KeyStrategy;

/// Builder for creating SegmentCacheConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct SegmentCacheConfigBuilder {
    config: SegmentCacheConfig,
}

impl SegmentCacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity in segments. Zero is ignored; the capacity
    /// must stay positive.
    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        if max_segments > 0 {
            self.config.max_segments = max_segments;
        }
        self
    }

    /// Set the key derivation strategy
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.config.key_strategy = strategy;
        self
    }

    /// Enable the periodic key-set dump at the given interval
    pub fn with_keyset_dump_interval(mut self, interval: Duration) -> Self {
        self.config.keyset_dump_interval = Some(interval);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> SegmentCacheConfig {
        self.config
    }
}
