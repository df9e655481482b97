//! # Slot Store
//!
//! Ordered, bounded collection of cache slots, oldest first. Owns FIFO
//! eviction; everything else about slot lifecycle lives in the cache engine.

use std::fmt;

use bytes::Bytes;

/// Consumer callback awaiting the result of an in-flight fetch.
pub type SegmentListener = Box<dyn FnOnce(Bytes) + Send>;

/// Lifecycle state of a cache slot.
pub enum SlotState {
    /// Fetch issued, nothing queued on the result yet.
    Pending,
    /// Fetch issued, consumers waiting on the result in registration order.
    PendingWithWaiters(Vec<SegmentListener>),
    /// Fetch finished, payload available.
    Ready(Bytes),
}

impl SlotState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl fmt::Debug for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::PendingWithWaiters(waiters) => f
                .debug_tuple("PendingWithWaiters")
                .field(&waiters.len())
                .finish(),
            Self::Ready(payload) => f.debug_tuple("Ready").field(&payload.len()).finish(),
        }
    }
}

/// A single cache slot: key plus lifecycle state.
#[derive(Debug)]
pub struct SegmentSlot {
    pub key: String,
    pub state: SlotState,
}

impl SegmentSlot {
    /// Fresh placeholder slot for a fetch about to be issued.
    pub fn pending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: SlotState::Pending,
        }
    }
}

/// Ordered sequence of slots with FIFO eviction.
#[derive(Debug, Default)]
pub struct SlotStore {
    slots: Vec<SegmentSlot>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add a slot at the tail (newest position).
    pub fn append(&mut self, slot: SegmentSlot) {
        self.slots.push(slot);
    }

    /// Index of the slot for `key`, scanning newest to oldest so the freshest
    /// slot wins if duplicates ever exist transiently.
    pub fn find_by_key(&self, key: &str) -> Option<usize> {
        self.slots.iter().rposition(|slot| slot.key == key)
    }

    /// Mutable access to the freshest slot for `key`.
    pub fn find_mut_by_key(&mut self, key: &str) -> Option<&mut SegmentSlot> {
        self.find_by_key(key).and_then(|i| self.slots.get_mut(i))
    }

    pub fn slot(&self, index: usize) -> Option<&SegmentSlot> {
        self.slots.get(index)
    }

    /// Remove `count` slots starting at `start`, clamped to the store length.
    ///
    /// Payload references are cleared ahead of removal so the memory is
    /// released even if something still indexes into the tail of the range.
    pub fn evict(&mut self, start: usize, count: usize) {
        if start >= self.slots.len() || count == 0 {
            return;
        }
        let end = (start + count).min(self.slots.len());
        for slot in &mut self.slots[start..end] {
            slot.state = SlotState::Pending;
        }
        self.slots.drain(start..end);
    }

    /// Evict oldest slots until the store fits `max_segments`.
    pub fn enforce_capacity(&mut self, max_segments: usize) {
        if self.slots.len() > max_segments {
            let overflow = self.slots.len() - max_segments;
            self.evict(0, overflow);
        }
    }

    /// Snapshot of all keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.key.clone()).collect()
    }
}
