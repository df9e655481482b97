// Periodic key-set dump for operator visibility; not on the correctness path.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::cache::SegmentCache;

/// Spawn a task that traces the cached key set at `interval` until aborted.
///
/// The task runs forever; the host owns the handle and aborts it on session
/// teardown.
pub fn spawn_keyset_dump(cache: &SegmentCache, interval: Duration) -> JoinHandle<()> {
    let cache = cache.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            trace!(keys = ?cache.keys(), "cache (keys)");
        }
    })
}

impl SegmentCache {
    /// Spawn the key-set dump task when the configuration opts in.
    pub fn spawn_diagnostics(&self) -> Option<JoinHandle<()>> {
        self.config()
            .keyset_dump_interval
            .map(|interval| spawn_keyset_dump(self, interval))
    }
}
