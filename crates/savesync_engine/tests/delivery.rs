//! End-to-end delivery tests: batching, ordering, verification and retry.

use parking_lot::Mutex;
use savesync_engine::{
    DeliveryOutcome, EngineConfig, EngineError, EngineResult, MockChannel, MockResponse,
    RetryConfig, SaveStatus, SaveSyncEngine, SubmissionChannel, UrgencyHint,
};
use savesync_protocol::{BatchKind, InstructionValue, PlayerId, SaveBatch, SaveReceipt};
use savesync_testkit::{confirming_receipt, mismatching_receipt};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

fn config() -> EngineConfig {
    EngineConfig::new()
        .with_receipt_timeout(Duration::from_secs(1))
        .with_retry(
            RetryConfig::new(5)
                .with_initial_delay(Duration::from_millis(100))
                .with_jitter(false),
        )
}

fn engine(channel: MockChannel) -> SaveSyncEngine<MockChannel> {
    SaveSyncEngine::in_memory(config(), channel)
}

/// What the first, slow submission ends with.
#[derive(Debug, Clone, Copy)]
enum FirstReply {
    ConnectionReset,
    Mismatch,
    Acknowledge,
}

/// Answers the first submission after `delay`, every later one at once.
struct SlowFirstReply {
    delay: Duration,
    reply: FirstReply,
    submitted: Mutex<Vec<SaveBatch>>,
}

impl SlowFirstReply {
    fn new(delay: Duration, reply: FirstReply) -> Self {
        Self {
            delay,
            reply,
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn submitted(&self) -> Vec<SaveBatch> {
        self.submitted.lock().clone()
    }
}

impl SubmissionChannel for SlowFirstReply {
    fn submit(&self, batch: &SaveBatch) -> impl Future<Output = EngineResult<SaveReceipt>> + Send {
        let first = {
            let mut submitted = self.submitted.lock();
            submitted.push(batch.clone());
            submitted.len() == 1
        };
        let (delay, reply) = (self.delay, self.reply);
        let batch = batch.clone();

        async move {
            if !first {
                return Ok(confirming_receipt(&batch));
            }
            time::sleep(delay).await;
            match reply {
                FirstReply::ConnectionReset => {
                    Err(EngineError::transport_retryable("connection reset"))
                }
                FirstReply::Mismatch => Ok(mismatching_receipt(&batch)),
                FirstReply::Acknowledge => Ok(confirming_receipt(&batch)),
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn urgent_batch_waits_for_older_queued_batch() {
    let engine = SaveSyncEngine::in_memory(
        config().with_max_open_instructions(3).with_heavy_threshold(3),
        MockChannel::new(),
    );

    for slot in ["sword", "shield", "bow"] {
        engine
            .enqueue_instruction("P1", format!("inventory.{slot}"), 1i64, UrgencyHint::Routine)
            .await
            .unwrap();
    }
    assert_eq!(engine.channel().submission_count(), 0);

    engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();

    let kinds: Vec<BatchKind> = engine
        .channel()
        .submitted()
        .iter()
        .map(|batch| batch.kind())
        .collect();
    assert_eq!(kinds, vec![BatchKind::Heavy, BatchKind::Critical]);
    assert_eq!(engine.stats().confirmations, 2);
}

#[tokio::test(start_paused = true)]
async fn conflicting_queued_batches_are_merged_before_submission() {
    let engine = SaveSyncEngine::in_memory(
        config().with_max_open_instructions(2).with_heavy_threshold(2),
        MockChannel::scripted([MockResponse::TransportError("offline".into())]),
    );
    let player = PlayerId::new("P1");

    // Blocks the queue while it waits for its retry
    let blocker = engine
        .enqueue_instruction(player.clone(), "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();
    assert!(matches!(
        engine.save_status(blocker),
        SaveStatus::AwaitingRetry { retry_count: 1, .. }
    ));

    let slim = engine
        .enqueue_instruction(player.clone(), "gold", 5i64, UrgencyHint::Routine)
        .await
        .unwrap();
    engine.flush_all().await.unwrap();
    assert_eq!(engine.save_status(slim), SaveStatus::Queued);

    engine
        .enqueue_instruction(player.clone(), "gold", 5i64, UrgencyHint::Routine)
        .await
        .unwrap();
    let heavy = engine
        .enqueue_instruction(player.clone(), "level", 2i64, UrgencyHint::Routine)
        .await
        .unwrap();

    assert_eq!(engine.stats().batches_merged, 1);
    assert_eq!(engine.save_status(slim), SaveStatus::NotFound);
    assert_eq!(engine.save_status(heavy), SaveStatus::Queued);

    time::advance(Duration::from_millis(100)).await;
    engine.tick().await.unwrap();

    let sent = engine.channel().submitted();
    assert_eq!(sent.len(), 3);
    let merged = &sent[2];
    assert_eq!(merged.session_batch_id(), heavy);
    assert_eq!(merged.kind(), BatchKind::Heavy);
    assert_eq!(merged.instructions().len(), 2);
    assert_eq!(merged.instructions().get("gold"), Some(&InstructionValue::Integer(5)));
    assert_eq!(merged.instructions().get("level"), Some(&InstructionValue::Integer(2)));
}

#[tokio::test(start_paused = true)]
async fn unresolvable_conflict_submits_both_batches() {
    let engine = SaveSyncEngine::in_memory(
        config().with_max_open_instructions(1),
        MockChannel::scripted([MockResponse::TransportError("offline".into())]),
    );

    engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();
    let number = engine
        .enqueue_instruction("P1", "title", 7i64, UrgencyHint::Routine)
        .await
        .unwrap();
    let text = engine
        .enqueue_instruction("P1", "title", "Knight", UrgencyHint::Routine)
        .await
        .unwrap();

    assert_eq!(engine.stats().unmerged_conflicts, 1);
    assert_eq!(engine.save_status(number), SaveStatus::Queued);
    assert_eq!(engine.save_status(text), SaveStatus::Queued);

    time::advance(Duration::from_millis(100)).await;
    engine.tick().await.unwrap();

    let ids: Vec<_> = engine
        .channel()
        .submitted()
        .iter()
        .skip(2)
        .map(|batch| batch.session_batch_id())
        .collect();
    assert_eq!(ids, vec![number, text]);
}

#[tokio::test(start_paused = true)]
async fn hash_mismatch_schedules_retry_with_growing_backoff() {
    let engine = engine(MockChannel::scripted([
        MockResponse::CorruptHash,
        MockResponse::CorruptHash,
    ]));
    let id = engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();

    let SaveStatus::AwaitingRetry {
        retry_count: 1,
        next_retry_at: Some(first_retry),
    } = engine.save_status(id)
    else {
        panic!("expected a scheduled retry, got {:?}", engine.save_status(id));
    };
    assert!(first_retry > Instant::now());
    assert_eq!(engine.stats().hash_mismatches, 1);

    time::advance(Duration::from_millis(100)).await;
    engine.tick().await.unwrap();

    let SaveStatus::AwaitingRetry {
        retry_count: 2,
        next_retry_at: Some(second_retry),
    } = engine.save_status(id)
    else {
        panic!("expected a second retry, got {:?}", engine.save_status(id));
    };
    assert!(second_retry > first_retry);
    assert_eq!(second_retry - Instant::now(), Duration::from_millis(200));

    // Every attempt resends the identical batch
    let sent = engine.channel().submitted();
    assert_eq!(sent[0], sent[1]);
    assert_eq!(sent[0].expected_hash(), sent[1].expected_hash());
}

#[tokio::test(start_paused = true)]
async fn fifth_mismatch_escalates_and_stops_retrying() {
    let engine = engine(MockChannel::scripted(vec![MockResponse::CorruptHash; 5]));
    let player = PlayerId::new("P1");
    let id = engine
        .enqueue_instruction(player.clone(), "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();

    for _ in 0..6 {
        time::advance(Duration::from_secs(10)).await;
        engine.tick().await.unwrap();
    }

    assert_eq!(engine.channel().submission_count(), 5);
    assert_eq!(engine.save_status(id), SaveStatus::Escalated { retry_count: 5 });

    let stats = engine.stats();
    assert_eq!(stats.hash_mismatches, 5);
    assert_eq!(stats.escalations, 1);
    assert!(stats.last_error.is_some());

    let unconfirmed = engine.unconfirmed_saves(&player);
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(unconfirmed[0].batch.session_batch_id(), id);
    assert_eq!(unconfirmed[0].retry_count, 5);

    // The player's next save is not blocked by the escalated one
    let next = engine
        .enqueue_instruction(player.clone(), "gold", 3i64, UrgencyHint::Critical)
        .await
        .unwrap();
    assert_eq!(engine.save_status(next), SaveStatus::NotFound);
    assert_eq!(engine.channel().submission_count(), 6);

    let batch = engine.dismiss_escalated(id).unwrap();
    assert_eq!(batch.session_batch_id(), id);
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);
    assert!(engine.unconfirmed_saves(&player).is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_receipt_times_out_and_is_retried() {
    let engine = engine(MockChannel::scripted([MockResponse::Delay(Duration::from_secs(5))]));
    let id = engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();

    assert!(matches!(
        engine.save_status(id),
        SaveStatus::AwaitingRetry { retry_count: 1, .. }
    ));
    assert_eq!(engine.stats().timeouts, 1);

    time::advance(Duration::from_millis(100)).await;
    engine.tick().await.unwrap();
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);
}

#[tokio::test(start_paused = true)]
async fn late_receipts_are_checked_against_the_tracked_batch() {
    let engine = engine(MockChannel::scripted([MockResponse::CorruptHash]));
    let id = engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();
    let batch = engine.channel().submitted()[0].clone();

    let mut foreign = confirming_receipt(&batch);
    foreign.player_id = PlayerId::new("P2");
    assert!(matches!(
        engine.deliver_receipt(&foreign),
        Err(EngineError::PlayerMismatch { .. })
    ));

    // A mismatch only counts while an attempt is outstanding
    assert!(engine.deliver_receipt(&mismatching_receipt(&batch)).is_err());

    engine.deliver_receipt(&confirming_receipt(&batch)).unwrap();
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);

    assert!(matches!(
        engine.deliver_receipt(&confirming_receipt(&batch)),
        Err(EngineError::UnknownBatch(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn players_flush_independently() {
    let engine = engine(MockChannel::scripted([MockResponse::TransportError(
        "offline".into(),
    )]));

    let p1 = engine
        .enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical)
        .await
        .unwrap();
    let p2 = engine
        .enqueue_instruction("P2", "hearts", -1i64, UrgencyHint::Backup)
        .await
        .unwrap();

    assert!(matches!(engine.save_status(p1), SaveStatus::AwaitingRetry { .. }));
    assert_eq!(engine.save_status(p2), SaveStatus::NotFound);

    let backup = &engine.channel().submitted()[1];
    assert_eq!(backup.kind(), BatchKind::SuperBackup);
    assert!(backup.is_urgent());
}

#[tokio::test(start_paused = true)]
async fn abandoned_attempt_is_timed_out_and_retried() {
    let engine = engine(MockChannel::scripted([MockResponse::Delay(Duration::from_secs(5))]));

    let abandoned = time::timeout(
        Duration::from_millis(10),
        engine.enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical),
    )
    .await;
    assert!(abandoned.is_err());
    let id = engine.channel().submitted()[0].session_batch_id();
    assert_eq!(engine.save_status(id), SaveStatus::InFlight);

    time::advance(engine.config().receipt_timeout).await;
    let report = engine.tick().await.unwrap();
    assert_eq!(report.timed_out, 1);
    assert!(matches!(
        engine.save_status(id),
        SaveStatus::AwaitingRetry { retry_count: 1, .. }
    ));

    time::advance(Duration::from_millis(100)).await;
    engine.tick().await.unwrap();
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);

    // The player's slot is free again
    let next = engine
        .enqueue_instruction("P1", "gold", 5i64, UrgencyHint::Critical)
        .await
        .unwrap();
    assert_eq!(engine.save_status(next), SaveStatus::NotFound);
    assert_eq!(engine.channel().submission_count(), 3);
    assert_eq!(engine.stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn late_confirmation_outranks_a_failing_attempt() {
    let engine = SaveSyncEngine::in_memory(
        config(),
        SlowFirstReply::new(Duration::from_millis(500), FirstReply::ConnectionReset),
    );

    let (first, queued) = tokio::join!(
        engine.enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical),
        async {
            time::sleep(Duration::from_millis(100)).await;
            let queued = engine
                .enqueue_instruction("P1", "gold", 5i64, UrgencyHint::Routine)
                .await
                .unwrap();
            assert_eq!(engine.flush_all().await.unwrap(), 0);

            time::sleep(Duration::from_millis(150)).await;
            let batch = engine.channel().submitted()[0].clone();
            assert_eq!(
                engine.deliver_receipt(&confirming_receipt(&batch)).unwrap(),
                DeliveryOutcome::Confirmed
            );
            queued
        }
    );

    let first = first.unwrap();
    assert_eq!(engine.save_status(first), SaveStatus::NotFound);

    // The queued batch went out once the failing attempt returned
    let sent = engine.channel().submitted();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].session_batch_id(), queued);
    assert_eq!(engine.save_status(queued), SaveStatus::NotFound);

    let stats = engine.stats();
    assert_eq!(stats.confirmations, 2);
    assert_eq!(stats.transport_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn late_mismatch_is_counted_once_per_attempt() {
    let engine = SaveSyncEngine::in_memory(
        config(),
        SlowFirstReply::new(Duration::from_millis(500), FirstReply::Mismatch),
    );

    let (id, late) = tokio::join!(
        engine.enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical),
        async {
            time::sleep(Duration::from_millis(250)).await;
            let batch = engine.channel().submitted()[0].clone();
            engine.deliver_receipt(&mismatching_receipt(&batch))
        }
    );

    assert!(matches!(
        late.unwrap(),
        DeliveryOutcome::RetryScheduled { retry_count: 1, .. }
    ));
    let id = id.unwrap();
    assert!(matches!(
        engine.save_status(id),
        SaveStatus::AwaitingRetry { retry_count: 1, .. }
    ));
    assert_eq!(engine.stats().hash_mismatches, 1);

    engine.tick().await.unwrap();
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);
    assert_eq!(engine.channel().submitted().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn attempt_confirms_after_a_late_mismatch() {
    let engine = SaveSyncEngine::in_memory(
        config(),
        SlowFirstReply::new(Duration::from_millis(500), FirstReply::Acknowledge),
    );

    let (id, _) = tokio::join!(
        engine.enqueue_instruction("P1", "hearts", -1i64, UrgencyHint::Critical),
        async {
            time::sleep(Duration::from_millis(250)).await;
            let batch = engine.channel().submitted()[0].clone();
            engine.deliver_receipt(&mismatching_receipt(&batch)).unwrap();
        }
    );

    let id = id.unwrap();
    assert_eq!(engine.save_status(id), SaveStatus::NotFound);
    assert_eq!(engine.channel().submitted().len(), 1);
    assert_eq!(engine.stats().confirmations, 1);
}
