use alloy::primitives::B256;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::events::types::LogEntry;

/// Remembers the last `capacity` (tx hash, log index) pairs dispatched so a
/// log re-broadcast by the provider is handled once.
///
/// Entries without an origin are always let through. A capacity of 0
/// disables suppression.
pub struct DedupWindow {
    capacity: usize,
    inner: Mutex<DedupState>,
}

#[derive(Default)]
struct DedupState {
    seen: HashSet<(B256, u64)>,
    order: VecDeque<(B256, u64)>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(DedupState::default()),
        }
    }

    /// Returns `true` the first time an entry's origin is seen.
    pub fn first_delivery(&self, entry: &LogEntry) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let Some(origin) = entry.origin else {
            return true;
        };
        let key = (origin.tx_hash, origin.log_index);

        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !state.seen.insert(key) {
            return false;
        }

        state.order.push_back(key);
        if state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.seen.remove(&evicted);
            }
        }
        true
    }
}
