//! Conflict detection and resolution between pending batches.

use crate::error::{EngineError, EngineResult};
use savesync_protocol::{BatchConflict, Instructions, SaveBatch};

/// Decides whether two pending batches collide.
///
/// Callers only pass batches that have not been submitted yet; once a batch
/// is submitted it is immutable and later changes open a new batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchConflictDetector;

impl BatchConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Returns the conflict between `a` and `b`, if any.
    ///
    /// Batches conflict when they belong to the same player and their
    /// instruction key sets intersect. Batch kind plays no part.
    pub fn detect(&self, a: &SaveBatch, b: &SaveBatch) -> Option<BatchConflict> {
        if a.player_id() != b.player_id() || a.session_batch_id() == b.session_batch_id() {
            return None;
        }

        let overlap = a.instructions().overlapping_keys(b.instructions());
        if overlap.is_empty() {
            return None;
        }

        Some(BatchConflict::new(a.clone(), b.clone(), overlap))
    }
}

/// Deterministically merges a conflicting pair into one batch.
///
/// - Overlapping keys take the later batch's value (last writer wins)
/// - Non-overlapping keys are kept from both
/// - The result inherits the ID of the urgent component, or of the later
///   one if both share urgency
/// - Urgency is the OR of the inputs; kind is the higher-priority kind
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchConflictResolver;

impl BatchConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves `conflict` into a single batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConflictUnresolvable`] if an overlapping key
    /// holds values of non-comparable types in the two batches.
    pub fn resolve(&self, conflict: &BatchConflict) -> EngineResult<SaveBatch> {
        let earlier = conflict.earlier();
        let later = conflict.later();

        for key in conflict.overlapping_keys() {
            let comparable = match (
                earlier.instructions().get(key),
                later.instructions().get(key),
            ) {
                (Some(old), Some(new)) => old.is_comparable_with(new),
                _ => true,
            };
            if !comparable {
                return Err(EngineError::ConflictUnresolvable {
                    player: conflict.player_id().clone(),
                    key: key.clone(),
                    earlier: earlier.session_batch_id(),
                    later: later.session_batch_id(),
                });
            }
        }

        let mut merged: Instructions = earlier.instructions().clone();
        for (path, value) in later.instructions() {
            merged.insert(path.clone(), value.clone());
        }

        let inherit_from = match (earlier.is_urgent(), later.is_urgent()) {
            (true, false) => earlier,
            _ => later,
        };

        let mut resolved = SaveBatch::create(
            earlier.kind().max_priority(later.kind()),
            later.player_id().clone(),
            inherit_from.session_batch_id(),
            later.created_at(),
            merged,
        );
        if earlier.is_urgent() || later.is_urgent() {
            resolved.mark_urgent();
        }

        Ok(resolved)
    }
}
