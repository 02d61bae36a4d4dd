//! Orchestration of detect → resolve for batches queued side by side.

use crate::conflict::{BatchConflictDetector, BatchConflictResolver};
use savesync_protocol::SaveBatch;
use tracing::{debug, warn};

/// Result of combining two pending batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The batches conflicted and were merged into one.
    Merged(SaveBatch),
    /// The batches did not conflict; returned in creation order.
    Disjoint(SaveBatch, SaveBatch),
    /// The batches conflicted but could not be merged; returned in creation
    /// order and submitted independently.
    Unmerged(SaveBatch, SaveBatch),
}

impl MergeOutcome {
    /// Returns true if the inputs were merged into one batch.
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged(_))
    }

    /// Returns the resulting batches, earliest first.
    pub fn into_batches(self) -> Vec<SaveBatch> {
        match self {
            MergeOutcome::Merged(batch) => vec![batch],
            MergeOutcome::Disjoint(first, second) | MergeOutcome::Unmerged(first, second) => {
                vec![first, second]
            }
        }
    }
}

/// Combines a newly sealed batch with the unflushed batch queued ahead of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMergeCoordinator {
    detector: BatchConflictDetector,
    resolver: BatchConflictResolver,
}

impl BatchMergeCoordinator {
    /// Creates a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the detector and, on conflict, the resolver.
    ///
    /// Unresolvable conflicts never discard either batch.
    pub fn combine(&self, a: SaveBatch, b: SaveBatch) -> MergeOutcome {
        let (first, second) = if a.recency_cmp(&b).is_gt() {
            (b, a)
        } else {
            (a, b)
        };

        let Some(conflict) = self.detector.detect(&first, &second) else {
            return MergeOutcome::Disjoint(first, second);
        };

        match self.resolver.resolve(&conflict) {
            Ok(merged) => {
                debug!(
                    player = %merged.player_id(),
                    first = %first.session_batch_id(),
                    second = %second.session_batch_id(),
                    merged = %merged.session_batch_id(),
                    overlapping = conflict.overlapping_keys().len(),
                    "merged conflicting batches"
                );
                MergeOutcome::Merged(merged)
            }
            Err(err) => {
                warn!(error = %err, "keeping conflicting batches unmerged");
                MergeOutcome::Unmerged(first, second)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_protocol::{
        BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SessionBatchId,
    };

    fn batch(kind: BatchKind, seq: u64, instructions: Instructions) -> SaveBatch {
        SaveBatch::create(
            kind,
            PlayerId::new("P1"),
            SessionBatchId::new_random(),
            BatchTimestamp::new(seq, 0),
            instructions,
        )
    }

    #[test]
    fn disjoint_batches_pass_through_in_creation_order() {
        let heavy = batch(
            BatchKind::Heavy,
            190,
            [("level", 3i64)].into_iter().collect(),
        );
        let critical = batch(
            BatchKind::Critical,
            200,
            [("hearts", -1i64)].into_iter().collect(),
        );

        let outcome = BatchMergeCoordinator::new().combine(critical.clone(), heavy.clone());
        assert_eq!(outcome, MergeOutcome::Disjoint(heavy, critical));
    }

    #[test]
    fn spec_example_merge() {
        let slim = batch(BatchKind::Slim, 100, [("gold", 5i64)].into_iter().collect());
        let heavy = batch(
            BatchKind::Heavy,
            105,
            [("gold", 5i64), ("level", 2i64)].into_iter().collect(),
        );

        let outcome = BatchMergeCoordinator::new().combine(slim, heavy.clone());
        assert!(outcome.is_merged());

        let batches = outcome.into_batches();
        assert_eq!(batches.len(), 1);
        let merged = &batches[0];
        assert_eq!(merged.instructions().len(), 2);
        assert_eq!(
            merged.instructions().get("gold"),
            Some(&InstructionValue::from(5))
        );
        assert_eq!(
            merged.instructions().get("level"),
            Some(&InstructionValue::from(2))
        );
        assert_eq!(merged.created_at(), heavy.created_at());
    }

    #[test]
    fn unresolvable_keeps_both() {
        let a = batch(BatchKind::Slim, 1, [("title", 3i64)].into_iter().collect());
        let b = batch(BatchKind::Slim, 2, [("title", "Knight")].into_iter().collect());

        let outcome = BatchMergeCoordinator::new().combine(b.clone(), a.clone());
        assert_eq!(outcome, MergeOutcome::Unmerged(a, b));
    }
}
