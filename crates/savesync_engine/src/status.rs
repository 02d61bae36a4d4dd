//! Status and statistics reported by the engine.

use savesync_protocol::SaveBatch;
use tokio::time::Instant;

/// Where a batch currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// Still accumulating instructions.
    Open,
    /// Sealed and waiting behind the player's in-flight batch.
    Queued,
    /// Registered for delivery; an attempt is outstanding or about to start.
    InFlight,
    /// The last attempt failed and a retry is scheduled.
    AwaitingRetry {
        /// Failed attempts so far.
        retry_count: u32,
        /// When the next attempt is due.
        next_retry_at: Option<Instant>,
    },
    /// Retries exhausted; kept until dismissed.
    Escalated {
        /// Failed attempts in total.
        retry_count: u32,
    },
    /// Confirmed, dismissed or never seen.
    NotFound,
}

impl SaveStatus {
    /// Returns true for saves that are not yet confirmed.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SaveStatus::NotFound)
    }
}

/// A save the server never confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedSave {
    /// The escalated batch.
    pub batch: SaveBatch,
    /// Failed attempts in total.
    pub retry_count: u32,
}

/// Engine statistics.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Batches sealed from open batches.
    pub batches_sealed: u64,
    /// Pairs of batches merged into one.
    pub batches_merged: u64,
    /// Conflicting pairs kept apart.
    pub unmerged_conflicts: u64,
    /// Submission attempts.
    pub submissions: u64,
    /// Batches confirmed by a matching receipt.
    pub confirmations: u64,
    /// Receipts with a wrong hash.
    pub hash_mismatches: u64,
    /// Attempts with no receipt before the deadline.
    pub timeouts: u64,
    /// Attempts that failed in the transport.
    pub transport_failures: u64,
    /// Batches escalated after exhausting retries.
    pub escalations: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// What one driver tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Attempts that passed their receipt deadline.
    pub timed_out: usize,
    /// Open batches sealed by the coalescing timer.
    pub sealed: usize,
    /// Submission attempts made.
    pub attempts: usize,
}
