//! Batch, receipt and archive fixtures.
//!
//! Convenience builders for tests that need hand-picked batches rather
//! than generated ones.

use savesync_protocol::{
    BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SaveBatch, SaveHash,
    SaveReceipt, SessionBatchId,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Builds an instruction set from `(path, value)` pairs.
pub fn instructions<V>(pairs: &[(&str, V)]) -> Instructions
where
    V: Clone + Into<InstructionValue>,
{
    pairs
        .iter()
        .map(|(key, value)| (*key, value.clone()))
        .collect()
}

/// Returns a deterministic batch ID derived from `seq`.
pub fn batch_id(seq: u64) -> SessionBatchId {
    let mut bytes = [0u8; 16];
    bytes[8..].copy_from_slice(&seq.to_be_bytes());
    SessionBatchId::from_bytes(bytes)
}

/// Creates a batch for `player` created at logical time `seq`.
///
/// The batch ID is [`batch_id`]`(seq)`, so two batches built with the
/// same `seq` share an ID.
pub fn batch_at<V>(kind: BatchKind, player: &str, seq: u64, pairs: &[(&str, V)]) -> SaveBatch
where
    V: Clone + Into<InstructionValue>,
{
    SaveBatch::create(
        kind,
        PlayerId::new(player),
        batch_id(seq),
        BatchTimestamp::new(seq, seq * 1_000),
        instructions(pairs),
    )
}

/// Creates a receipt for `batch` reporting `received` as the stored hash.
pub fn receipt_for(batch: &SaveBatch, received: SaveHash) -> SaveReceipt {
    let created = batch.created_at().wall_millis;
    SaveReceipt::new(
        batch.player_id().clone(),
        batch.session_batch_id(),
        created,
        created + 25,
        batch.expected_hash(),
        received,
    )
}

/// Creates a receipt confirming `batch`.
pub fn confirming_receipt(batch: &SaveBatch) -> SaveReceipt {
    receipt_for(batch, batch.expected_hash())
}

/// Creates a receipt whose stored hash differs from the batch's.
pub fn mismatching_receipt(batch: &SaveBatch) -> SaveReceipt {
    receipt_for(batch, SaveHash::compute(b"not the stored save"))
}

/// A temporary directory holding an archive file.
pub struct TempArchiveDir {
    dir: TempDir,
}

impl TempArchiveDir {
    /// Creates a new empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the archive file inside the directory.
    pub fn archive_path(&self) -> PathBuf {
        self.dir.path().join("saves").join("pending.archive")
    }
}

impl Default for TempArchiveDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ids_follow_sequence() {
        assert_eq!(batch_id(7), batch_id(7));
        assert_ne!(batch_id(7), batch_id(8));
    }

    #[test]
    fn receipts_match_or_not() {
        let batch = batch_at(BatchKind::Slim, "P1", 3, &[("gold", 5)]);
        assert!(confirming_receipt(&batch).hashes_match());
        assert!(!mismatching_receipt(&batch).hashes_match());
        assert_eq!(receipt_for(&batch, batch.expected_hash()).round_trip_millis(), Some(25));
    }

    #[test]
    fn archive_path_is_inside_temp_dir() {
        let dir = TempArchiveDir::new();
        assert!(dir.archive_path().ends_with("saves/pending.archive"));
        assert!(!dir.archive_path().exists());
    }
}
