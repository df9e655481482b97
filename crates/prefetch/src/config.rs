use std::time::Duration;

use crate::key::KeyStrategy;

/// Default cache capacity in segments.
pub const DEFAULT_MAX_SEGMENTS: usize = 20;

/// Configurable options for the segment cache
#[derive(Debug, Clone)]
pub struct SegmentCacheConfig {
    /// Hard cap on the number of slots; oldest slots are evicted past it.
    /// Must be positive.
    pub max_segments: usize,

    /// How segment URLs map to cache keys.
    pub key_strategy: KeyStrategy,

    /// When set, a diagnostics task may periodically trace the cached key
    /// set at this interval. Purely for operator visibility.
    pub keyset_dump_interval: Option<Duration>,
}

impl Default for SegmentCacheConfig {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
            key_strategy: KeyStrategy::default(),
            keyset_dump_interval: None,
        }
    }
}

impl SegmentCacheConfig {
    pub fn builder() -> crate::builder::SegmentCacheConfigBuilder {
        crate::builder::SegmentCacheConfigBuilder::new()
    }
}
