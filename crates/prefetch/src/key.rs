//! Segment URL classification and cache-key derivation.
//!
//! A segment URL is anything carrying a `.ts` extension marker, optionally
//! followed by a query or fragment. Keys are derived from the URL under one
//! of three strategies; derivation is pure and deterministic, so the same URL
//! always lands on the same slot.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PrefetchError;

static TS_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.ts(?:[?#]|$)").expect("valid extension pattern"));
static TS_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/([^/]+\.ts)").expect("valid filename pattern"));
static TS_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+\.ts)").expect("valid sequence pattern"));

/// Strategy for mapping a segment URL to its cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Trailing `<digits>.ts` suffix (ex: `"123.ts"`).
    #[default]
    SequenceAndExtension,
    /// Trailing path segment (full filename of the `.ts` file).
    Filename,
    /// The URL verbatim.
    FullUrl,
}

impl TryFrom<u8> for KeyStrategy {
    type Error = PrefetchError;

    /// Numeric selector used by host configuration: 0, 1 or 2.
    fn try_from(selector: u8) -> Result<Self, Self::Error> {
        match selector {
            0 => Ok(Self::SequenceAndExtension),
            1 => Ok(Self::Filename),
            2 => Ok(Self::FullUrl),
            other => Err(PrefetchError::Config(format!(
                "unknown cache key strategy selector: {other}"
            ))),
        }
    }
}

/// Whether the URL names a media segment the cache applies to.
pub fn is_segment_url(url: &str) -> bool {
    TS_EXTENSION.is_match(url)
}

/// Derive the cache key for a segment URL under the given strategy.
///
/// When a narrower strategy's pattern does not match, the whole URL is the
/// key; a non-conforming segment URL still caches consistently under itself.
pub fn derive_key(url: &str, strategy: KeyStrategy) -> String {
    match strategy {
        KeyStrategy::FullUrl => url.to_owned(),
        KeyStrategy::Filename => TS_FILENAME
            .captures(url)
            .map_or_else(|| url.to_owned(), |c| c[1].to_owned()),
        KeyStrategy::SequenceAndExtension => TS_SEQUENCE
            .captures(url)
            .map_or_else(|| url.to_owned(), |c| c[1].to_owned()),
    }
}
