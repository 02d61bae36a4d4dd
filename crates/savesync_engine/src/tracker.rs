//! Tracking of submitted batches until a verified receipt arrives.
//!
//! Each registered batch moves through:
//!
//! ```text
//! Queued → Submitted → Confirmed
//!              │
//!              ├─ hash mismatch / timeout / transport failure
//!              │       → AwaitingRetry → Submitted → ...
//!              └─ retries exhausted → Escalated
//! ```
//!
//! Every state change replaces the whole record, in memory and in the
//! archive. The archive is written first, so a crash never leaves the
//! in-memory table ahead of durable state.

use crate::archive::{ArchivePhase, ArchiveRecord, ArchiveStorage, TempRecordArchive};
use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use savesync_protocol::{PlayerId, SaveBatch, SaveHash, SaveReceipt, SessionBatchId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Why a batch is waiting for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryCause {
    /// The server reported a different hash than expected.
    HashMismatch,
    /// No receipt arrived before the deadline.
    TimedOut,
    /// The transport failed to deliver the batch.
    TransportFailure,
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::HashMismatch => write!(f, "hash mismatch"),
            RetryCause::TimedOut => write!(f, "timed out"),
            RetryCause::TransportFailure => write!(f, "transport failure"),
        }
    }
}

/// Delivery state of a tracked batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Registered but not attempted yet.
    Queued,
    /// An attempt is outstanding.
    Submitted,
    /// The last attempt failed; waiting for `next_retry_at`.
    AwaitingRetry {
        /// Why the last attempt failed.
        cause: RetryCause,
    },
    /// Retries exhausted. Terminal.
    Escalated,
}

impl BatchState {
    fn name(&self) -> &'static str {
        match self {
            BatchState::Queued => "queued",
            BatchState::Submitted => "submitted",
            BatchState::AwaitingRetry { .. } => "awaiting_retry",
            BatchState::Escalated => "escalated",
        }
    }
}

/// A batch awaiting server confirmation.
#[derive(Debug, Clone)]
pub struct UnconfirmedBatchRecord {
    /// The batch. Every attempt resubmits this same object.
    pub batch: Arc<SaveBatch>,
    /// Hash computed at registration.
    pub expected_hash: SaveHash,
    /// When the current or last attempt started.
    pub submitted_at: Option<Instant>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// When the next attempt is due.
    pub next_retry_at: Option<Instant>,
    /// Delivery state.
    pub state: BatchState,
}

impl UnconfirmedBatchRecord {
    fn new(batch: SaveBatch, expected_hash: SaveHash, retry_count: u32) -> Self {
        Self {
            batch: Arc::new(batch),
            expected_hash,
            submitted_at: None,
            retry_count,
            next_retry_at: None,
            state: BatchState::Queued,
        }
    }

    /// Returns the batch ID.
    pub fn session_batch_id(&self) -> SessionBatchId {
        self.batch.session_batch_id()
    }

    /// Returns the owning player.
    pub fn player_id(&self) -> &PlayerId {
        self.batch.player_id()
    }

    fn archive_record(&self, phase: ArchivePhase) -> ArchiveRecord {
        let mut record = ArchiveRecord::from_batch(&self.batch, phase, self.retry_count);
        record.expected_hash = self.expected_hash;
        record
    }
}

/// Result of processing a receipt or a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server stored exactly what was sent. The batch is purged.
    Confirmed,
    /// The attempt failed and another is scheduled.
    RetryScheduled {
        /// Why the attempt failed.
        cause: RetryCause,
        /// Failed attempts so far.
        retry_count: u32,
        /// When the next attempt is due.
        next_retry_at: Instant,
    },
    /// The attempt failed and no retries are left.
    Escalated {
        /// Why the last attempt failed.
        cause: RetryCause,
        /// Failed attempts in total.
        retry_count: u32,
    },
}

impl DeliveryOutcome {
    /// Returns true if the batch reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryOutcome::RetryScheduled { .. })
    }

    /// Returns the failure cause, if the attempt failed.
    pub fn cause(&self) -> Option<RetryCause> {
        match self {
            DeliveryOutcome::Confirmed => None,
            DeliveryOutcome::RetryScheduled { cause, .. }
            | DeliveryOutcome::Escalated { cause, .. } => Some(*cause),
        }
    }
}

/// Table of batches awaiting confirmation, backed by the archive.
#[derive(Debug)]
pub struct UnconfirmedBatchTracker<S: ArchiveStorage> {
    records: HashMap<SessionBatchId, UnconfirmedBatchRecord>,
    archive: TempRecordArchive<S>,
    retry: RetryConfig,
    receipt_timeout: Duration,
}

impl<S: ArchiveStorage> UnconfirmedBatchTracker<S> {
    /// Creates a tracker over `archive`.
    ///
    /// Records already in the archive are not loaded; see [`Self::restore`].
    pub fn new(archive: TempRecordArchive<S>, retry: RetryConfig, receipt_timeout: Duration) -> Self {
        Self {
            records: HashMap::new(),
            archive,
            retry,
            receipt_timeout,
        }
    }

    /// Returns the archive.
    pub fn archive(&self) -> &TempRecordArchive<S> {
        &self.archive
    }

    /// Durably records a sealed batch that is not registered yet.
    pub fn archive_queued(&mut self, batch: &SaveBatch) -> EngineResult<()> {
        self.archive.append(batch)?;
        Ok(())
    }

    /// Drops a queued batch that was merged into another.
    pub fn withdraw_queued(&mut self, id: SessionBatchId) -> EngineResult<()> {
        if self.records.contains_key(&id) {
            return Err(EngineError::InvalidStateTransition {
                session_batch_id: id,
                from: "registered".into(),
                to: "withdrawn".into(),
            });
        }
        self.archive.remove(id)?;
        Ok(())
    }

    /// Registers `batch` for submission and returns its expected hash.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateBatch`] if the batch is already tracked.
    pub fn register_submission(&mut self, batch: SaveBatch) -> EngineResult<SaveHash> {
        let id = batch.session_batch_id();
        if self.records.contains_key(&id) {
            return Err(EngineError::DuplicateBatch(id));
        }

        let expected_hash = batch.expected_hash();
        let record = UnconfirmedBatchRecord::new(batch, expected_hash, 0);
        self.archive.put(record.archive_record(ArchivePhase::Submitted))?;
        self.records.insert(id, record);
        Ok(expected_hash)
    }

    /// Re-registers a batch recovered from the archive, keeping its stored
    /// hash and retry count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateBatch`] if the batch is already tracked.
    pub fn restore(&mut self, record: &ArchiveRecord) -> EngineResult<()> {
        let id = record.session_batch_id;
        if self.records.contains_key(&id) {
            return Err(EngineError::DuplicateBatch(id));
        }

        self.records.insert(
            id,
            UnconfirmedBatchRecord::new(record.to_batch(), record.expected_hash, record.retry_count),
        );
        Ok(())
    }

    /// Marks an attempt as started and returns the batch to send.
    ///
    /// The returned batch is the same object on every attempt.
    pub fn begin_attempt(
        &mut self,
        id: SessionBatchId,
        now: Instant,
    ) -> EngineResult<Arc<SaveBatch>> {
        let current = self.records.get(&id).ok_or(EngineError::UnknownBatch(id))?;
        match current.state {
            BatchState::Queued | BatchState::AwaitingRetry { .. } => {}
            other => return Err(transition_error(id, other, BatchState::Submitted)),
        }

        let next = UnconfirmedBatchRecord {
            submitted_at: Some(now),
            next_retry_at: None,
            state: BatchState::Submitted,
            ..current.clone()
        };
        let batch = Arc::clone(&next.batch);
        self.records.insert(id, next);
        Ok(batch)
    }

    /// Applies a receipt from the server.
    ///
    /// A receipt whose received hash matches confirms the batch and purges
    /// it from both the table and the archive. A mismatch counts as a failed
    /// attempt.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownBatch`] if the batch is not tracked
    /// - [`EngineError::PlayerMismatch`] if the receipt names another player
    /// - [`EngineError::InvalidStateTransition`] if no attempt was made
    pub fn on_receipt(&mut self, receipt: &SaveReceipt, now: Instant) -> EngineResult<DeliveryOutcome> {
        let id = receipt.session_batch_id;
        let record = self.records.get(&id).ok_or(EngineError::UnknownBatch(id))?;

        if &receipt.player_id != record.player_id() {
            return Err(EngineError::PlayerMismatch {
                session_batch_id: id,
                expected: record.player_id().clone(),
                actual: receipt.player_id.clone(),
            });
        }

        let confirmed =
            receipt.hashes_match() && receipt.received_save_hash == record.expected_hash;

        match (record.state, confirmed) {
            (BatchState::Submitted | BatchState::AwaitingRetry { .. }, true) => {
                self.archive.remove(id)?;
                self.records.remove(&id);
                info!(
                    batch = %id,
                    player = %receipt.player_id,
                    round_trip_ms = receipt.round_trip_millis(),
                    "save confirmed"
                );
                Ok(DeliveryOutcome::Confirmed)
            }
            (BatchState::Submitted, false) => {
                warn!(
                    batch = %id,
                    expected = %record.expected_hash,
                    received = %receipt.received_save_hash,
                    "receipt hash mismatch"
                );
                self.record_failure(id, RetryCause::HashMismatch, now)
            }
            (other, _) => Err(transition_error(
                id,
                other,
                BatchState::AwaitingRetry {
                    cause: RetryCause::HashMismatch,
                },
            )),
        }
    }

    /// Counts a failed attempt and schedules a retry or escalates.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is unknown or has no outstanding attempt.
    pub fn record_failure(
        &mut self,
        id: SessionBatchId,
        cause: RetryCause,
        now: Instant,
    ) -> EngineResult<DeliveryOutcome> {
        let current = self.records.get(&id).ok_or(EngineError::UnknownBatch(id))?;
        if current.state != BatchState::Submitted {
            return Err(transition_error(
                id,
                current.state,
                BatchState::AwaitingRetry { cause },
            ));
        }

        let retry_count = current.retry_count.saturating_add(1);

        if self.retry.is_exhausted(retry_count) {
            let escalated = UnconfirmedBatchRecord {
                retry_count,
                next_retry_at: None,
                state: BatchState::Escalated,
                ..current.clone()
            };
            self.archive
                .put(escalated.archive_record(ArchivePhase::Escalated))?;
            self.records.remove(&id);

            error!(
                batch = %id,
                player = %escalated.player_id(),
                retry_count,
                cause = %cause,
                "save escalated after exhausting retries"
            );
            return Ok(DeliveryOutcome::Escalated { cause, retry_count });
        }

        let next_retry_at = now + self.retry.delay_for_retry(retry_count);
        let waiting = UnconfirmedBatchRecord {
            retry_count,
            next_retry_at: Some(next_retry_at),
            state: BatchState::AwaitingRetry { cause },
            ..current.clone()
        };
        self.archive
            .put(waiting.archive_record(ArchivePhase::Submitted))?;
        self.records.insert(id, waiting);

        Ok(DeliveryOutcome::RetryScheduled {
            cause,
            retry_count,
            next_retry_at,
        })
    }

    /// Returns submitted batches whose receipt deadline has passed.
    pub fn timed_out(&self, now: Instant) -> Vec<SessionBatchId> {
        self.records
            .values()
            .filter(|record| record.state == BatchState::Submitted)
            .filter(|record| {
                record
                    .submitted_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= self.receipt_timeout)
            })
            .map(UnconfirmedBatchRecord::session_batch_id)
            .collect()
    }

    /// Treats every batch past its receipt deadline as timed out, except
    /// those in `in_progress`, whose attempts settle themselves.
    pub fn sweep_timeouts(
        &mut self,
        now: Instant,
        in_progress: &HashSet<SessionBatchId>,
    ) -> EngineResult<Vec<(SessionBatchId, DeliveryOutcome)>> {
        let mut outcomes = Vec::new();
        for id in self.timed_out(now) {
            if in_progress.contains(&id) {
                continue;
            }
            warn!(batch = %id, "no receipt before deadline");
            outcomes.push((id, self.record_failure(id, RetryCause::TimedOut, now)?));
        }
        Ok(outcomes)
    }

    /// Returns batches whose retry is due, oldest first.
    pub fn due_for_retry(&self, now: Instant) -> Vec<SessionBatchId> {
        let mut due: Vec<&UnconfirmedBatchRecord> = self
            .records
            .values()
            .filter(|record| matches!(record.state, BatchState::AwaitingRetry { .. }))
            .filter(|record| record.next_retry_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by(|a, b| a.batch.recency_cmp(&b.batch));
        due.into_iter()
            .map(UnconfirmedBatchRecord::session_batch_id)
            .collect()
    }

    /// Returns the record for `id`.
    pub fn get(&self, id: SessionBatchId) -> Option<&UnconfirmedBatchRecord> {
        self.records.get(&id)
    }

    /// Returns escalated batches with their retry counts, oldest first.
    pub fn escalated(&self) -> Vec<(SaveBatch, u32)> {
        self.archive
            .escalated()
            .into_iter()
            .map(|record| (record.to_batch(), record.retry_count))
            .collect()
    }

    /// Hands an escalated batch back to the caller and forgets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is unknown or not escalated.
    pub fn dismiss_escalated(&mut self, id: SessionBatchId) -> EngineResult<SaveBatch> {
        let record = self.archive.get(id).ok_or(EngineError::UnknownBatch(id))?;
        if record.phase != ArchivePhase::Escalated {
            return Err(EngineError::InvalidStateTransition {
                session_batch_id: id,
                from: record.phase.label().into(),
                to: "dismissed".into(),
            });
        }

        let batch = record.to_batch();
        self.archive.remove(id)?;
        info!(batch = %id, player = %batch.player_id(), "escalated save dismissed");
        Ok(batch)
    }

    /// Number of tracked batches.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn transition_error(id: SessionBatchId, from: BatchState, to: BatchState) -> EngineError {
    EngineError::InvalidStateTransition {
        session_batch_id: id,
        from: from.name().into(),
        to: to.name().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchiveStorage;
    use savesync_protocol::{BatchKind, BatchTimestamp};

    fn tracker(max_retries: u32) -> UnconfirmedBatchTracker<MemoryArchiveStorage> {
        let retry = RetryConfig::new(max_retries)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false);
        UnconfirmedBatchTracker::new(
            TempRecordArchive::in_memory(),
            retry,
            Duration::from_secs(10),
        )
    }

    fn batch(seq: u64) -> SaveBatch {
        SaveBatch::create(
            BatchKind::Slim,
            PlayerId::new("P1"),
            SessionBatchId::new_random(),
            BatchTimestamp::new(seq, 0),
            [("gold", 5i64)].into_iter().collect(),
        )
    }

    fn receipt(batch: &SaveBatch, received: SaveHash) -> SaveReceipt {
        SaveReceipt::new(
            batch.player_id().clone(),
            batch.session_batch_id(),
            1_000,
            1_050,
            batch.expected_hash(),
            received,
        )
    }

    #[test]
    fn register_writes_archive_before_table() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let hash = tracker.register_submission(b.clone()).unwrap();

        assert_eq!(hash, b.expected_hash());
        let archived = tracker.archive().get(b.session_batch_id()).unwrap();
        assert_eq!(archived.phase, ArchivePhase::Submitted);
        assert_eq!(tracker.get(b.session_batch_id()).unwrap().state, BatchState::Queued);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut tracker = tracker(5);
        let b = batch(1);
        tracker.register_submission(b.clone()).unwrap();
        assert!(matches!(
            tracker.register_submission(b),
            Err(EngineError::DuplicateBatch(_))
        ));
    }

    #[test]
    fn matching_receipt_confirms_and_purges() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b.clone()).unwrap();
        let now = Instant::now();
        tracker.begin_attempt(id, now).unwrap();

        let outcome = tracker
            .on_receipt(&receipt(&b, b.expected_hash()), now)
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Confirmed);
        assert!(tracker.get(id).is_none());
        assert!(!tracker.archive().contains(id));

        // A second receipt finds nothing
        assert!(matches!(
            tracker.on_receipt(&receipt(&b, b.expected_hash()), now),
            Err(EngineError::UnknownBatch(_))
        ));
    }

    #[test]
    fn mismatch_schedules_retry_with_same_batch() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b.clone()).unwrap();

        let now = Instant::now();
        let first = tracker.begin_attempt(id, now).unwrap();
        let outcome = tracker
            .on_receipt(&receipt(&b, SaveHash::compute(b"tampered")), now)
            .unwrap();

        let DeliveryOutcome::RetryScheduled {
            retry_count,
            next_retry_at,
            cause,
        } = outcome
        else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(retry_count, 1);
        assert_eq!(cause, RetryCause::HashMismatch);
        assert!(next_retry_at > now);

        let record = tracker.get(id).unwrap();
        assert_eq!(record.expected_hash, b.expected_hash());
        assert_eq!(tracker.archive().get(id).unwrap().retry_count, 1);

        assert!(tracker.due_for_retry(now).is_empty());
        assert_eq!(tracker.due_for_retry(next_retry_at), vec![id]);

        let second = tracker.begin_attempt(id, next_retry_at).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn escalates_when_retries_exhausted() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b.clone()).unwrap();

        let mut now = Instant::now();
        for attempt in 1..=5u32 {
            tracker.begin_attempt(id, now).unwrap();
            let outcome = tracker
                .on_receipt(&receipt(&b, SaveHash::compute(b"bad")), now)
                .unwrap();
            if attempt < 5 {
                assert!(!outcome.is_terminal());
            } else {
                assert_eq!(
                    outcome,
                    DeliveryOutcome::Escalated {
                        cause: RetryCause::HashMismatch,
                        retry_count: 5
                    }
                );
            }
            now += Duration::from_secs(60);
        }

        assert!(tracker.get(id).is_none());
        assert!(tracker.due_for_retry(now).is_empty());
        let escalated = tracker.escalated();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].1, 5);

        let dismissed = tracker.dismiss_escalated(id).unwrap();
        assert_eq!(dismissed, b);
        assert!(tracker.archive().is_empty());
    }

    #[test]
    fn sweep_times_out_stale_attempts() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b).unwrap();

        let start = Instant::now();
        tracker.begin_attempt(id, start).unwrap();

        let none = HashSet::new();
        assert!(tracker.sweep_timeouts(start + Duration::from_secs(9), &none).unwrap().is_empty());
        let outcomes = tracker.sweep_timeouts(start + Duration::from_secs(10), &none).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1.cause(), Some(RetryCause::TimedOut));
    }

    #[test]
    fn sweep_skips_attempts_in_progress() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b).unwrap();

        let start = Instant::now();
        tracker.begin_attempt(id, start).unwrap();

        let late = start + Duration::from_secs(30);
        let in_progress = HashSet::from([id]);
        assert!(tracker.sweep_timeouts(late, &in_progress).unwrap().is_empty());
        assert_eq!(tracker.get(id).unwrap().state, BatchState::Submitted);

        let outcomes = tracker.sweep_timeouts(late, &HashSet::new()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, id);
        assert!(matches!(
            tracker.get(id).unwrap().state,
            BatchState::AwaitingRetry { cause: RetryCause::TimedOut }
        ));
    }

    #[test]
    fn failure_without_attempt_is_invalid() {
        let mut tracker = tracker(5);
        let b = batch(1);
        let id = b.session_batch_id();
        tracker.register_submission(b).unwrap();

        assert!(matches!(
            tracker.record_failure(id, RetryCause::TransportFailure, Instant::now()),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn receipt_for_other_player_is_rejected() {
        let mut tracker = tracker(5);
        let b = batch(1);
        tracker.register_submission(b.clone()).unwrap();
        tracker.begin_attempt(b.session_batch_id(), Instant::now()).unwrap();

        let mut r = receipt(&b, b.expected_hash());
        r.player_id = PlayerId::new("P2");
        assert!(matches!(
            tracker.on_receipt(&r, Instant::now()),
            Err(EngineError::PlayerMismatch { .. })
        ));
    }

    #[test]
    fn restore_keeps_hash_and_retry_count() {
        let b = batch(1);
        let record = ArchiveRecord::from_batch(&b, ArchivePhase::Submitted, 3);

        let mut tracker = tracker(5);
        tracker.restore(&record).unwrap();
        let restored = tracker.get(b.session_batch_id()).unwrap();
        assert_eq!(restored.retry_count, 3);
        assert_eq!(restored.expected_hash, b.expected_hash());
        assert_eq!(restored.state, BatchState::Queued);
    }
}
