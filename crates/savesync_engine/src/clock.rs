//! Source of batch creation timestamps.

use savesync_protocol::BatchTimestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hands out strictly increasing batch timestamps.
///
/// After a restart the clock is advanced past every archived timestamp,
/// so recovered batches always sort before new ones.
#[derive(Debug)]
pub struct BatchClock {
    next_sequence: AtomicU64,
}

impl BatchClock {
    /// Creates a clock starting at sequence 1.
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> BatchTimestamp {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        BatchTimestamp::new(sequence, wall_millis())
    }

    /// Ensures future timestamps sort after `seen`.
    pub fn observe(&self, seen: BatchTimestamp) {
        self.next_sequence
            .fetch_max(seen.sequence.saturating_add(1), Ordering::SeqCst);
    }
}

impl Default for BatchClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
