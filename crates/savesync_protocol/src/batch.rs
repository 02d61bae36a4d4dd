//! Save batches and batch kinds.

use crate::hash::SaveHash;
use crate::ids::{BatchTimestamp, PlayerId, SessionBatchId};
use crate::instructions::Instructions;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Priority tag of a save batch.
///
/// Kinds carry no payload semantics; they only select the default urgency
/// and scheduling priority of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchKind {
    /// A small routine batch.
    Slim,
    /// A routine batch holding many instructions.
    Heavy,
    /// A batch that must reach the server promptly (e.g. losing a life).
    Critical,
    /// A full-state backup batch.
    SuperBackup,
}

impl BatchKind {
    /// All kinds, lowest priority first.
    pub const ALL: [BatchKind; 4] = [
        BatchKind::Slim,
        BatchKind::Heavy,
        BatchKind::Critical,
        BatchKind::SuperBackup,
    ];

    /// Returns the urgency a freshly created batch of this kind starts with.
    #[must_use]
    pub const fn default_urgency(self) -> bool {
        match self {
            BatchKind::Slim | BatchKind::Heavy => false,
            BatchKind::Critical | BatchKind::SuperBackup => true,
        }
    }

    /// Returns the scheduling priority (higher is more important).
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            BatchKind::Slim => 0,
            BatchKind::Heavy => 1,
            BatchKind::Critical => 2,
            BatchKind::SuperBackup => 3,
        }
    }

    /// Returns true if batches of this kind skip the coalescing timer.
    #[must_use]
    pub const fn bypasses_coalescing(self) -> bool {
        self.default_urgency()
    }

    /// Returns the higher-priority of two kinds.
    #[must_use]
    pub const fn max_priority(self, other: Self) -> Self {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }

    /// Returns a short human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            BatchKind::Slim => "slim",
            BatchKind::Heavy => "heavy",
            BatchKind::Critical => "critical",
            BatchKind::SuperBackup => "super-backup",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An immutable, timestamped set of save instructions for one player.
///
/// # Invariants
///
/// - `instructions` and `session_batch_id` never change after construction
/// - Urgency can only be escalated, never downgraded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBatch {
    player_id: PlayerId,
    session_batch_id: SessionBatchId,
    created_at: BatchTimestamp,
    kind: BatchKind,
    urgent: bool,
    instructions: Instructions,
}

impl SaveBatch {
    /// Creates a batch with the default urgency of `kind`.
    #[must_use]
    pub fn create(
        kind: BatchKind,
        player_id: PlayerId,
        session_batch_id: SessionBatchId,
        created_at: BatchTimestamp,
        instructions: Instructions,
    ) -> Self {
        Self {
            player_id,
            session_batch_id,
            created_at,
            kind,
            urgent: kind.default_urgency(),
            instructions,
        }
    }

    /// Escalates this batch to urgent. Has no effect if already urgent.
    pub fn mark_urgent(&mut self) {
        self.urgent = true;
    }

    /// Returns true if this batch bypasses the coalescing timer.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Returns the owning player.
    #[must_use]
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Returns the batch ID.
    #[must_use]
    pub fn session_batch_id(&self) -> SessionBatchId {
        self.session_batch_id
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> BatchTimestamp {
        self.created_at
    }

    /// Returns the batch kind.
    #[must_use]
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Returns the save instructions.
    #[must_use]
    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    /// Returns the hash a correct server receipt must echo back.
    #[must_use]
    pub fn expected_hash(&self) -> SaveHash {
        self.instructions.save_hash()
    }

    /// Total recency order: creation time, then batch ID.
    ///
    /// `Greater` means `self` is the later writer.
    #[must_use]
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.session_batch_id.cmp(&other.session_batch_id))
    }
}
