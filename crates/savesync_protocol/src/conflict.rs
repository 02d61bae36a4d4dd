//! Conflicts between pending save batches.

use crate::batch::SaveBatch;
use crate::ids::PlayerId;
use std::collections::BTreeSet;

/// A collision between two pending batches of the same player whose
/// instruction key sets intersect.
///
/// The pair is stored in recency order, so the conflict built from
/// `(a, b)` equals the one built from `(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConflict {
    earlier: SaveBatch,
    later: SaveBatch,
    overlapping_keys: BTreeSet<String>,
}

impl BatchConflict {
    /// Creates a conflict, ordering the batches by recency.
    #[must_use]
    pub fn new(a: SaveBatch, b: SaveBatch, overlapping_keys: BTreeSet<String>) -> Self {
        let (earlier, later) = if a.recency_cmp(&b).is_gt() {
            (b, a)
        } else {
            (a, b)
        };
        Self {
            earlier,
            later,
            overlapping_keys,
        }
    }

    /// The older batch.
    #[must_use]
    pub fn earlier(&self) -> &SaveBatch {
        &self.earlier
    }

    /// The newer batch; its values win on overlapping keys.
    #[must_use]
    pub fn later(&self) -> &SaveBatch {
        &self.later
    }

    /// Field paths set by both batches.
    #[must_use]
    pub fn overlapping_keys(&self) -> &BTreeSet<String> {
        &self.overlapping_keys
    }

    /// The player both batches belong to.
    #[must_use]
    pub fn player_id(&self) -> &PlayerId {
        self.earlier.player_id()
    }

    /// Returns the batches as `(earlier, later)`.
    #[must_use]
    pub fn into_parts(self) -> (SaveBatch, SaveBatch) {
        (self.earlier, self.later)
    }
}
