//! The save sync engine.
//!
//! Instructions are accumulated per player into an open batch. Sealed batches
//! wait in the player's queue, where each newly sealed batch is combined with
//! the batch queued directly ahead of it. At most one batch per player is
//! registered for delivery at a time; the next queued batch is only
//! registered once the current one is confirmed or escalated.
//!
//! All bookkeeping happens under one lock that is never held across a
//! submission, so no batch is ever observed half-updated.

use crate::archive::{ArchivePhase, ArchiveRecord, ArchiveStorage, MemoryArchiveStorage, TempRecordArchive};
use crate::channel::SubmissionChannel;
use crate::clock::BatchClock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::merge::{BatchMergeCoordinator, MergeOutcome};
use crate::status::{EngineStats, SaveStatus, TickReport, UnconfirmedSave};
use crate::tracker::{BatchState, DeliveryOutcome, RetryCause, UnconfirmedBatchTracker};
use parking_lot::Mutex;
use savesync_protocol::{
    BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SaveBatch, SaveReceipt,
    SessionBatchId,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How urgently a producer needs an instruction saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UrgencyHint {
    /// Coalesce with other changes until the next periodic flush.
    #[default]
    Routine,
    /// Save now as a `Critical` batch.
    Critical,
    /// Save now as a `SuperBackup` batch.
    Backup,
}

impl UrgencyHint {
    fn urgent_kind(self) -> Option<BatchKind> {
        match self {
            UrgencyHint::Routine => None,
            UrgencyHint::Critical => Some(BatchKind::Critical),
            UrgencyHint::Backup => Some(BatchKind::SuperBackup),
        }
    }
}

#[derive(Debug)]
struct OpenBatch {
    session_batch_id: SessionBatchId,
    created_at: BatchTimestamp,
    opened_at: Instant,
    instructions: Instructions,
}

#[derive(Debug, Default)]
struct PlayerStream {
    open: Option<OpenBatch>,
    /// Sealed, archived, not yet registered. Creation order.
    queued: VecDeque<SaveBatch>,
    /// Recovered as submitted and restored to the tracker, waiting behind
    /// `in_flight`. Never merged.
    restored: VecDeque<SessionBatchId>,
    /// Registered with the tracker and not yet terminal.
    in_flight: Option<SessionBatchId>,
}

impl PlayerStream {
    fn is_idle(&self) -> bool {
        self.open.is_none() && !self.has_pending()
    }

    fn has_pending(&self) -> bool {
        !self.queued.is_empty() || !self.restored.is_empty() || self.in_flight.is_some()
    }
}

#[derive(Debug)]
struct EngineInner<S: ArchiveStorage> {
    players: HashMap<PlayerId, PlayerStream>,
    tracker: UnconfirmedBatchTracker<S>,
    stats: EngineStats,
    attempts_in_progress: HashSet<SessionBatchId>,
}

/// Clears a batch's in-progress mark if its attempt ends without reaching
/// the bookkeeping after the submission, such as when the caller drops the
/// future mid-submit. The batch is then timed out by the next tick.
struct AttemptGuard<'a, S: ArchiveStorage> {
    inner: &'a Mutex<EngineInner<S>>,
    id: SessionBatchId,
    armed: bool,
}

impl<S: ArchiveStorage> AttemptGuard<'_, S> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: ArchiveStorage> Drop for AttemptGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            debug!(batch = %self.id, "attempt abandoned before its outcome");
            self.inner.lock().attempts_in_progress.remove(&self.id);
        }
    }
}

/// Batches, merges, submits and verifies player saves.
///
/// # Example
///
/// ```
/// use savesync_engine::{EngineConfig, MockChannel, SaveStatus, SaveSyncEngine, UrgencyHint};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let engine = SaveSyncEngine::in_memory(EngineConfig::default(), MockChannel::new());
/// let id = engine
///     .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
///     .await
///     .unwrap();
///
/// // Acknowledged with a matching hash, so already purged
/// assert_eq!(engine.save_status(id), SaveStatus::NotFound);
/// assert_eq!(engine.stats().confirmations, 1);
/// # });
/// ```
pub struct SaveSyncEngine<C: SubmissionChannel, S: ArchiveStorage = MemoryArchiveStorage> {
    config: EngineConfig,
    channel: Arc<C>,
    clock: BatchClock,
    coordinator: BatchMergeCoordinator,
    inner: Mutex<EngineInner<S>>,
}

impl<C: SubmissionChannel> SaveSyncEngine<C, MemoryArchiveStorage> {
    /// Creates an engine with an empty in-memory archive.
    pub fn in_memory(config: EngineConfig, channel: C) -> Self {
        Self::assemble(config, channel, TempRecordArchive::in_memory())
    }
}

impl<C: SubmissionChannel, S: ArchiveStorage> SaveSyncEngine<C, S> {
    /// Opens an engine over `archive`, recovering every pending save.
    ///
    /// Queued batches are re-merged per player in creation order, submitted
    /// batches are re-registered with their stored hash and retry count, and
    /// escalated batches stay escalated. Recovery completes before the
    /// engine accepts any new instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be rewritten during recovery.
    pub fn open(config: EngineConfig, channel: C, archive: TempRecordArchive<S>) -> EngineResult<Self> {
        let engine = Self::assemble(config, channel, archive);
        engine.recover()?;
        Ok(engine)
    }

    fn assemble(config: EngineConfig, channel: C, archive: TempRecordArchive<S>) -> Self {
        let tracker =
            UnconfirmedBatchTracker::new(archive, config.retry.clone(), config.receipt_timeout);
        Self {
            config,
            channel: Arc::new(channel),
            clock: BatchClock::new(),
            coordinator: BatchMergeCoordinator::new(),
            inner: Mutex::new(EngineInner {
                players: HashMap::new(),
                tracker,
                stats: EngineStats::default(),
                attempts_in_progress: HashSet::new(),
            }),
        }
    }

    fn recover(&self) -> EngineResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let records: Vec<ArchiveRecord> = inner
            .tracker
            .archive()
            .records_in_order()
            .into_iter()
            .cloned()
            .collect();

        let (mut restored, mut requeued, mut escalated) = (0usize, 0usize, 0usize);
        for record in records {
            self.clock.observe(record.created_at);
            match record.phase {
                ArchivePhase::Escalated => escalated += 1,
                ArchivePhase::Submitted => {
                    let stream = inner.players.entry(record.player_id.clone()).or_default();
                    inner.tracker.restore(&record)?;
                    if stream.in_flight.is_none() {
                        stream.in_flight = Some(record.session_batch_id);
                    } else {
                        // Only one batch per player is attempted at a time
                        stream.restored.push_back(record.session_batch_id);
                    }
                    restored += 1;
                }
                ArchivePhase::Queued => {
                    self.push_sealed(inner, record.to_batch())?;
                    requeued += 1;
                }
            }
        }

        if restored + requeued + escalated > 0 {
            info!(restored, requeued, escalated, "recovered pending saves");
        }
        Ok(())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the submission channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats.clone()
    }

    /// Adds one instruction for `player` and returns the ID of the batch
    /// that now carries it.
    ///
    /// Routine instructions join the player's open batch and return
    /// immediately. Critical and backup instructions seal the open batch,
    /// go into an urgent batch of their own and flush the player before
    /// returning; anything queued ahead is still submitted first.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    pub async fn enqueue_instruction(
        &self,
        player: impl Into<PlayerId>,
        key: impl Into<String>,
        value: impl Into<InstructionValue>,
        hint: UrgencyHint,
    ) -> EngineResult<SessionBatchId> {
        let player = player.into();
        let key = key.into();
        let value = value.into();

        let id = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            match hint.urgent_kind() {
                None => {
                    let stream = inner.players.entry(player.clone()).or_default();
                    let open = stream.open.get_or_insert_with(|| OpenBatch {
                        session_batch_id: SessionBatchId::new_random(),
                        created_at: self.clock.now(),
                        opened_at: Instant::now(),
                        instructions: Instructions::new(),
                    });
                    open.instructions.insert(key, value);
                    let id = open.session_batch_id;

                    if open.instructions.len() >= self.config.max_open_instructions {
                        self.seal_open(inner, &player, false)?.unwrap_or(id)
                    } else {
                        id
                    }
                }
                Some(kind) => {
                    self.seal_open(inner, &player, false)?;

                    let mut instructions = Instructions::new();
                    instructions.insert(key, value);
                    let batch = SaveBatch::create(
                        kind,
                        player.clone(),
                        SessionBatchId::new_random(),
                        self.clock.now(),
                        instructions,
                    );
                    inner.stats.batches_sealed += 1;
                    self.push_sealed(inner, batch)?
                }
            }
        };

        if hint != UrgencyHint::Routine {
            self.drive_player(&player).await?;
        }
        Ok(id)
    }

    /// Promotes the player's open batch to urgent and flushes it now.
    ///
    /// Returns the ID of the sealed batch, or `None` if nothing was open.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    pub async fn escalate_open(&self, player: &PlayerId) -> EngineResult<Option<SessionBatchId>> {
        let sealed = {
            let mut guard = self.inner.lock();
            self.seal_open(&mut guard, player, true)?
        };
        if sealed.is_some() {
            self.drive_player(player).await?;
        }
        Ok(sealed)
    }

    /// Seals every open batch and submits whatever is ready.
    ///
    /// Batches waiting out a retry backoff are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    pub async fn flush_all(&self) -> EngineResult<usize> {
        self.seal_all_open()?;
        let mut attempts = 0;
        for player in self.active_players() {
            attempts += self.drive_player(&player).await?;
        }
        Ok(attempts)
    }

    /// Runs one round of timer-driven work.
    ///
    /// Attempts past their receipt deadline are timed out, open batches
    /// older than the flush interval are sealed, and every player with a
    /// batch ready to go is driven.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    pub async fn tick(&self) -> EngineResult<TickReport> {
        let mut report = TickReport::default();

        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let now = Instant::now();

            let stale = inner
                .tracker
                .sweep_timeouts(now, &inner.attempts_in_progress)?;
            for (id, outcome) in &stale {
                Self::settle(inner, *id, outcome);
            }
            report.timed_out = stale.len();

            let flush_interval = self.config.flush_interval;
            let expired: Vec<PlayerId> = inner
                .players
                .iter()
                .filter(|(_, stream)| {
                    stream.open.as_ref().is_some_and(|open| {
                        now.saturating_duration_since(open.opened_at) >= flush_interval
                    })
                })
                .map(|(player, _)| player.clone())
                .collect();
            for player in &expired {
                self.seal_open(inner, player, false)?;
                report.sealed += 1;
            }

            inner.players.retain(|_, stream| !stream.is_idle());
        }

        for player in self.active_players() {
            report.attempts += self.drive_player(&player).await?;
        }
        Ok(report)
    }

    /// Drives [`Self::tick`] every `tick_interval` until `shutdown` turns
    /// true or its sender is dropped, then seals every open batch.
    ///
    /// Tick failures are logged and recorded in the stats; the driver keeps
    /// running.
    ///
    /// # Errors
    ///
    /// Returns an error if open batches cannot be archived on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "save sync driver started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "driver tick failed");
                        self.inner.lock().stats.last_error = Some(err.to_string());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let sealed = self.seal_all_open()?;
        info!(sealed, "save sync driver stopped");
        Ok(())
    }

    /// Applies a receipt that arrived outside a submission, such as a late
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is unknown, the receipt names another
    /// player, or the batch was never attempted.
    pub fn deliver_receipt(&self, receipt: &SaveReceipt) -> EngineResult<DeliveryOutcome> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = receipt.session_batch_id;
        let outcome = inner.tracker.on_receipt(receipt, Instant::now())?;
        Self::settle(inner, id, &outcome);
        Ok(outcome)
    }

    /// Returns where the batch `id` currently is.
    pub fn save_status(&self, id: SessionBatchId) -> SaveStatus {
        let inner = self.inner.lock();

        for stream in inner.players.values() {
            if stream
                .open
                .as_ref()
                .is_some_and(|open| open.session_batch_id == id)
            {
                return SaveStatus::Open;
            }
            if stream.queued.iter().any(|b| b.session_batch_id() == id) {
                return SaveStatus::Queued;
            }
        }

        if let Some(record) = inner.tracker.get(id) {
            return match record.state {
                BatchState::Queued | BatchState::Submitted => SaveStatus::InFlight,
                BatchState::AwaitingRetry { .. } => SaveStatus::AwaitingRetry {
                    retry_count: record.retry_count,
                    next_retry_at: record.next_retry_at,
                },
                BatchState::Escalated => SaveStatus::Escalated {
                    retry_count: record.retry_count,
                },
            };
        }

        match inner.tracker.archive().get(id) {
            Some(record) if record.phase == ArchivePhase::Escalated => SaveStatus::Escalated {
                retry_count: record.retry_count,
            },
            _ => SaveStatus::NotFound,
        }
    }

    /// Returns the player's escalated saves, oldest first.
    pub fn unconfirmed_saves(&self, player: &PlayerId) -> Vec<UnconfirmedSave> {
        self.inner
            .lock()
            .tracker
            .escalated()
            .into_iter()
            .filter(|(batch, _)| batch.player_id() == player)
            .map(|(batch, retry_count)| UnconfirmedSave { batch, retry_count })
            .collect()
    }

    /// Hands an escalated save back to the caller for manual recovery and
    /// removes it from the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is unknown or not escalated.
    pub fn dismiss_escalated(&self, id: SessionBatchId) -> EngineResult<SaveBatch> {
        self.inner.lock().tracker.dismiss_escalated(id)
    }

    /// Submits the player's batches until one has to wait or none are left.
    async fn drive_player(&self, player: &PlayerId) -> EngineResult<usize> {
        let mut attempts = 0;
        loop {
            let batch = {
                let mut guard = self.inner.lock();
                match self.next_attempt(&mut guard, player, Instant::now())? {
                    Some(batch) => batch,
                    None => return Ok(attempts),
                }
            };

            attempts += 1;
            let outcome = self.attempt(batch).await?;
            if !outcome.is_terminal() {
                return Ok(attempts);
            }
        }
    }

    fn next_attempt(
        &self,
        inner: &mut EngineInner<S>,
        player: &PlayerId,
        now: Instant,
    ) -> EngineResult<Option<Arc<SaveBatch>>> {
        let Some(stream) = inner.players.get_mut(player) else {
            return Ok(None);
        };

        if let Some(id) = stream.in_flight {
            match inner.tracker.get(id) {
                None => stream.in_flight = None,
                Some(record) => {
                    let ready = !inner.attempts_in_progress.contains(&id)
                        && match record.state {
                            BatchState::Queued => true,
                            BatchState::AwaitingRetry { .. } => {
                                record.next_retry_at.is_some_and(|at| at <= now)
                            }
                            BatchState::Submitted | BatchState::Escalated => false,
                        };
                    if !ready {
                        return Ok(None);
                    }
                    return Self::start_attempt(inner, id, now).map(Some);
                }
            }
        }

        if let Some(id) = stream.restored.pop_front() {
            stream.in_flight = Some(id);
            return Self::start_attempt(inner, id, now).map(Some);
        }

        let Some(next) = stream.queued.pop_front() else {
            return Ok(None);
        };
        let id = next.session_batch_id();
        if let Err(err) = inner.tracker.register_submission(next.clone()) {
            stream.queued.push_front(next);
            return Err(err);
        }
        stream.in_flight = Some(id);

        Self::start_attempt(inner, id, now).map(Some)
    }

    fn start_attempt(
        inner: &mut EngineInner<S>,
        id: SessionBatchId,
        now: Instant,
    ) -> EngineResult<Arc<SaveBatch>> {
        let batch = inner.tracker.begin_attempt(id, now)?;
        inner.attempts_in_progress.insert(id);
        inner.stats.submissions += 1;

        debug!(
            batch = %id,
            player = %batch.player_id(),
            kind = %batch.kind(),
            retry_count = inner.tracker.get(id).map_or(0, |record| record.retry_count),
            "submitting batch"
        );
        Ok(batch)
    }

    async fn attempt(&self, batch: Arc<SaveBatch>) -> EngineResult<DeliveryOutcome> {
        let id = batch.session_batch_id();
        let mut attempt_guard = AttemptGuard {
            inner: &self.inner,
            id,
            armed: true,
        };
        let result = time::timeout(self.config.receipt_timeout, self.channel.submit(&batch)).await;
        let now = Instant::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.attempts_in_progress.remove(&id);
        attempt_guard.disarm();

        if let Some(earlier) = Self::settled_during_attempt(inner, id) {
            let confirms = matches!(
                (&result, &earlier),
                (Ok(Ok(receipt)), DeliveryOutcome::RetryScheduled { .. })
                    if receipt.session_batch_id == id
                        && receipt.hashes_match()
                        && receipt.received_save_hash == batch.expected_hash()
            );
            if !confirms {
                debug!(batch = %id, "batch settled by a receipt while in flight");
                return Ok(earlier);
            }
        }

        let outcome = match result {
            Ok(Ok(receipt)) if receipt.session_batch_id == id => {
                match inner.tracker.on_receipt(&receipt, now) {
                    Ok(outcome) => outcome,
                    Err(err @ EngineError::PlayerMismatch { .. }) => {
                        warn!(error = %err, "rejecting receipt");
                        inner.stats.last_error = Some(err.to_string());
                        inner
                            .tracker
                            .record_failure(id, RetryCause::HashMismatch, now)?
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(Ok(receipt)) => {
                warn!(
                    batch = %id,
                    receipt_batch = %receipt.session_batch_id,
                    "receipt names another batch"
                );
                inner
                    .tracker
                    .record_failure(id, RetryCause::HashMismatch, now)?
            }
            Ok(Err(err)) => {
                warn!(batch = %id, error = %err, "submission failed");
                inner.stats.last_error = Some(err.to_string());
                inner
                    .tracker
                    .record_failure(id, RetryCause::TransportFailure, now)?
            }
            Err(_) => {
                warn!(
                    batch = %id,
                    timeout_ms = self.config.receipt_timeout.as_millis() as u64,
                    "no receipt before deadline"
                );
                inner.tracker.record_failure(id, RetryCause::TimedOut, now)?
            }
        };

        Self::settle(inner, id, &outcome);
        Ok(outcome)
    }

    /// Returns the outcome a receipt delivered through
    /// [`Self::deliver_receipt`] already applied while the attempt for `id`
    /// was pending, or `None` if the batch is still waiting on this attempt.
    fn settled_during_attempt(inner: &EngineInner<S>, id: SessionBatchId) -> Option<DeliveryOutcome> {
        match inner.tracker.get(id) {
            Some(record) => match record.state {
                BatchState::AwaitingRetry { cause } => Some(DeliveryOutcome::RetryScheduled {
                    cause,
                    retry_count: record.retry_count,
                    next_retry_at: record.next_retry_at.unwrap_or_else(Instant::now),
                }),
                _ => None,
            },
            // Receipts only fail an attempt by hash mismatch
            None => match inner.tracker.archive().get(id) {
                Some(record) if record.phase == ArchivePhase::Escalated => {
                    Some(DeliveryOutcome::Escalated {
                        cause: RetryCause::HashMismatch,
                        retry_count: record.retry_count,
                    })
                }
                _ => Some(DeliveryOutcome::Confirmed),
            },
        }
    }

    fn settle(inner: &mut EngineInner<S>, id: SessionBatchId, outcome: &DeliveryOutcome) {
        let stats = &mut inner.stats;
        match outcome.cause() {
            None => stats.confirmations += 1,
            Some(RetryCause::HashMismatch) => stats.hash_mismatches += 1,
            Some(RetryCause::TimedOut) => stats.timeouts += 1,
            Some(RetryCause::TransportFailure) => stats.transport_failures += 1,
        }
        if let DeliveryOutcome::Escalated { retry_count, .. } = outcome {
            stats.escalations += 1;
            stats.last_error = Some(
                EngineError::RetriesExhausted {
                    session_batch_id: id,
                    retries: *retry_count,
                }
                .to_string(),
            );
        }

        if outcome.is_terminal() {
            for stream in inner.players.values_mut() {
                if stream.in_flight == Some(id) {
                    stream.in_flight = None;
                }
            }
        }
    }

    /// Seals the player's open batch into the queue.
    fn seal_open(
        &self,
        inner: &mut EngineInner<S>,
        player: &PlayerId,
        urgent: bool,
    ) -> EngineResult<Option<SessionBatchId>> {
        let Some(open) = inner
            .players
            .get_mut(player)
            .and_then(|stream| stream.open.take())
        else {
            return Ok(None);
        };

        let kind = if open.instructions.len() >= self.config.heavy_threshold {
            BatchKind::Heavy
        } else {
            BatchKind::Slim
        };
        let mut batch = SaveBatch::create(
            kind,
            player.clone(),
            open.session_batch_id,
            open.created_at,
            open.instructions,
        );
        if urgent {
            batch.mark_urgent();
        }

        inner.stats.batches_sealed += 1;
        debug!(
            player = %player,
            batch = %batch.session_batch_id(),
            kind = %kind,
            urgent,
            instructions = batch.instructions().len(),
            "sealed batch"
        );
        self.push_sealed(inner, batch).map(Some)
    }

    /// Archives `batch` and queues it behind the player's other sealed
    /// batches, merging it with the batch directly ahead when they conflict.
    ///
    /// Returns the ID of the queued batch that carries `batch`'s
    /// instructions.
    fn push_sealed(&self, inner: &mut EngineInner<S>, batch: SaveBatch) -> EngineResult<SessionBatchId> {
        let new_id = batch.session_batch_id();
        if !inner.tracker.archive().contains(new_id) {
            inner.tracker.archive_queued(&batch)?;
        }

        let stream = inner.players.entry(batch.player_id().clone()).or_default();
        let Some(tail) = stream.queued.pop_back() else {
            stream.queued.push_back(batch);
            return Ok(new_id);
        };
        let tail_id = tail.session_batch_id();

        match self.coordinator.combine(tail, batch) {
            MergeOutcome::Merged(merged) => {
                let merged_id = merged.session_batch_id();
                stream.queued.push_back(merged.clone());
                inner.stats.batches_merged += 1;

                inner.tracker.archive_queued(&merged)?;
                for id in [tail_id, new_id] {
                    if id != merged_id {
                        inner.tracker.withdraw_queued(id)?;
                    }
                }
                Ok(merged_id)
            }
            MergeOutcome::Disjoint(first, second) => {
                stream.queued.extend([first, second]);
                Ok(new_id)
            }
            MergeOutcome::Unmerged(first, second) => {
                stream.queued.extend([first, second]);
                inner.stats.unmerged_conflicts += 1;
                Ok(new_id)
            }
        }
    }

    fn seal_all_open(&self) -> EngineResult<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let players: Vec<PlayerId> = inner
            .players
            .iter()
            .filter(|(_, stream)| stream.open.is_some())
            .map(|(player, _)| player.clone())
            .collect();
        for player in &players {
            self.seal_open(inner, player, false)?;
        }
        Ok(players.len())
    }

    fn active_players(&self) -> Vec<PlayerId> {
        let inner = self.inner.lock();
        let mut players: Vec<PlayerId> = inner
            .players
            .iter()
            .filter(|(_, stream)| stream.has_pending())
            .map(|(player, _)| player.clone())
            .collect();
        players.sort();
        players
    }
}
