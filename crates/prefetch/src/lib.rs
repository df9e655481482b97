//! # prefetch-engine
//!
//! In-memory prefetch cache for sequentially named media segments,
//! embedded in a streaming-video proxy. Segments discovered in a manifest
//! are fetched speculatively, already-fetched bytes are served immediately,
//! and concurrent fetches of the same segment are deduplicated.
//!
//! ## Features
//!
//! - Configurable URL-to-key strategies (sequence, filename, full URL)
//! - Per-key fetch deduplication via synchronous pending placeholders
//! - Bounded FIFO eviction, oldest segments first
//! - Listener queues for consumers awaiting an in-flight fetch
//! - Pluggable transport behind the `SegmentFetcher` trait

pub mod builder;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod key;
pub mod store;

pub use builder::SegmentCacheConfigBuilder;
pub use cache::{SegmentCache, SegmentLookup};
pub use config::{DEFAULT_MAX_SEGMENTS, SegmentCacheConfig};
pub use diagnostics::spawn_keyset_dump;
pub use error::PrefetchError;
pub use fetch::{FetcherConfig, HttpSegmentFetcher, SegmentFetcher, create_client};
pub use key::{KeyStrategy, derive_key, is_segment_url};
pub use store::{SegmentListener, SegmentSlot, SlotState, SlotStore};
