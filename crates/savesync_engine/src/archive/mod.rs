//! Temp record archive.
//!
//! The archive is a durable, append-only log of every batch that has been
//! accepted but not yet confirmed. Each change to a batch's delivery state
//! appends a whole-record `Upsert` frame; confirmation appends a `Remove`
//! frame. The live view is rebuilt by replaying the log on open.
//!
//! # Recovery
//!
//! - A trailing frame cut short by a crash is truncated with a warning
//! - A checksum failure anywhere else is reported as corruption
//! - Live records whose stored hash no longer matches their instructions are
//!   reported as corruption
//!
//! # Compaction
//!
//! Superseded frames are dropped by [`TempRecordArchive::compact`], which
//! rewrites the log with one frame per live record. It runs automatically
//! once the number of superseded frames reaches the configured threshold.

mod record;
mod storage;

pub use record::{
    compute_crc32, scan_frames, ArchiveFrame, ArchivePhase, ArchiveRecord, FrameOp, FrameScan,
    FRAME_OVERHEAD,
};
pub use storage::{ArchiveStorage, FileArchiveStorage, MemoryArchiveStorage};

use crate::config::ArchiveConfig;
use crate::error::ArchiveResult;
use savesync_protocol::{SaveBatch, SessionBatchId};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// What was found when the archive was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Frames replayed.
    pub frames: usize,
    /// Records live after replay.
    pub live_records: usize,
    /// Bytes of a torn trailing frame that were truncated.
    pub torn_bytes: u64,
}

/// Size of the log before and after a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Frames before compaction.
    pub frames_before: usize,
    /// Frames after compaction.
    pub frames_after: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Durable store of unconfirmed batches, keyed by session batch ID.
#[derive(Debug)]
pub struct TempRecordArchive<S: ArchiveStorage = MemoryArchiveStorage> {
    storage: S,
    config: ArchiveConfig,
    records: HashMap<SessionBatchId, ArchiveRecord>,
    frames: usize,
    replay: ReplaySummary,
}

impl TempRecordArchive<MemoryArchiveStorage> {
    /// Creates an empty in-memory archive.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: MemoryArchiveStorage::new(),
            config: ArchiveConfig::default(),
            records: HashMap::new(),
            frames: 0,
            replay: ReplaySummary::default(),
        }
    }
}

impl TempRecordArchive<FileArchiveStorage> {
    /// Opens the archive file at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked, unreadable or corrupt.
    pub fn open_file(path: &Path, config: ArchiveConfig) -> ArchiveResult<Self> {
        let storage = FileArchiveStorage::open(path)?;
        Self::open(storage, config)
    }
}

impl<S: ArchiveStorage> TempRecordArchive<S> {
    /// Opens an archive over `storage`, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupt or cannot be read.
    pub fn open(mut storage: S, config: ArchiveConfig) -> ArchiveResult<Self> {
        let data = storage.read_all()?;
        let scan = scan_frames(&data)?;

        if scan.torn_bytes > 0 {
            warn!(
                valid_len = scan.valid_len,
                torn_bytes = scan.torn_bytes,
                "truncating torn archive tail"
            );
            storage.truncate(scan.valid_len)?;
        }

        let mut records = HashMap::new();
        let frames = scan.frames.len();
        for (_, frame) in scan.frames {
            match frame {
                ArchiveFrame::Upsert(record) => {
                    records.insert(record.session_batch_id, record);
                }
                ArchiveFrame::Remove(id) => {
                    records.remove(&id);
                }
            }
        }

        for record in records.values() {
            record.verify_hash()?;
        }

        let replay = ReplaySummary {
            frames,
            live_records: records.len(),
            torn_bytes: scan.torn_bytes,
        };
        if frames > 0 {
            info!(
                frames = replay.frames,
                live_records = replay.live_records,
                "replayed temp record archive"
            );
        }

        Ok(Self {
            storage,
            config,
            records,
            frames,
            replay,
        })
    }

    /// Archives `batch` as queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append(&mut self, batch: &SaveBatch) -> ArchiveResult<()> {
        self.put(ArchiveRecord::from_batch(batch, ArchivePhase::Queued, 0))
    }

    /// Writes `record`, replacing any record with the same ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn put(&mut self, record: ArchiveRecord) -> ArchiveResult<()> {
        self.write_frame(&ArchiveFrame::Upsert(record.clone()))?;
        debug!(
            batch = %record.session_batch_id,
            phase = record.phase.label(),
            retry_count = record.retry_count,
            "archived record"
        );
        self.records.insert(record.session_batch_id, record);
        self.maybe_compact()
    }

    /// Removes the record for `id`.
    ///
    /// Returns false if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be written.
    pub fn remove(&mut self, id: SessionBatchId) -> ArchiveResult<bool> {
        if !self.records.contains_key(&id) {
            return Ok(false);
        }

        self.write_frame(&ArchiveFrame::Remove(id))?;
        self.records.remove(&id);
        self.maybe_compact()?;
        Ok(true)
    }

    /// Returns the record for `id`.
    pub fn get(&self, id: SessionBatchId) -> Option<&ArchiveRecord> {
        self.records.get(&id)
    }

    /// Returns true if a record exists for `id`.
    pub fn contains(&self, id: SessionBatchId) -> bool {
        self.records.contains_key(&id)
    }

    /// Returns every non-escalated batch in original creation order.
    pub fn load_all_pending(&self) -> Vec<SaveBatch> {
        self.records_in_order()
            .into_iter()
            .filter(|record| record.phase != ArchivePhase::Escalated)
            .map(ArchiveRecord::to_batch)
            .collect()
    }

    /// Returns every live record in creation order.
    pub fn records_in_order(&self) -> Vec<&ArchiveRecord> {
        let mut records: Vec<&ArchiveRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_batch_id.cmp(&b.session_batch_id))
        });
        records
    }

    /// Returns escalated records in creation order.
    pub fn escalated(&self) -> Vec<&ArchiveRecord> {
        self.records_in_order()
            .into_iter()
            .filter(|record| record.phase == ArchivePhase::Escalated)
            .collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are live.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of frames in the log.
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Number of frames in the log that no longer describe a live record.
    pub fn superseded_count(&self) -> usize {
        self.frames.saturating_sub(self.records.len())
    }

    /// Returns what was found when the archive was opened.
    pub fn replay_summary(&self) -> ReplaySummary {
        self.replay
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Rewrites the log with one frame per live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written.
    pub fn compact(&mut self) -> ArchiveResult<CompactionStats> {
        let frames_before = self.frames;
        let bytes_before = self.storage.size()?;

        let mut data = Vec::new();
        for record in self.records_in_order() {
            data.extend(ArchiveFrame::Upsert(record.clone()).encode()?);
        }
        self.storage.replace(&data)?;
        self.frames = self.records.len();

        let stats = CompactionStats {
            frames_before,
            frames_after: self.frames,
            bytes_before,
            bytes_after: data.len() as u64,
        };
        info!(
            frames_before = stats.frames_before,
            frames_after = stats.frames_after,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "compacted temp record archive"
        );
        Ok(stats)
    }

    fn write_frame(&mut self, frame: &ArchiveFrame) -> ArchiveResult<()> {
        let bytes = frame.encode()?;
        self.storage.append(&bytes)?;
        if self.config.sync_on_write {
            self.storage.sync()?;
        }
        self.frames += 1;
        Ok(())
    }

    fn maybe_compact(&mut self) -> ArchiveResult<()> {
        if self.config.compact_threshold > 0
            && self.superseded_count() >= self.config.compact_threshold
        {
            self.compact()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;
    use savesync_protocol::{BatchKind, BatchTimestamp, PlayerId};
    use tempfile::tempdir;

    fn batch(player: &str, seq: u64) -> SaveBatch {
        SaveBatch::create(
            BatchKind::Slim,
            PlayerId::new(player),
            SessionBatchId::new_random(),
            BatchTimestamp::new(seq, 0),
            [("gold", seq as i64)].into_iter().collect(),
        )
    }

    #[test]
    fn append_remove_and_reopen() {
        let storage = MemoryArchiveStorage::new();
        let first = batch("P1", 1);
        let second = batch("P1", 2);

        {
            let mut archive = TempRecordArchive::open(storage.clone(), ArchiveConfig::default())
                .unwrap();
            archive.append(&second).unwrap();
            archive.append(&first).unwrap();
            assert!(archive.remove(second.session_batch_id()).unwrap());
            assert!(!archive.remove(second.session_batch_id()).unwrap());
        }

        let archive = TempRecordArchive::open(storage, ArchiveConfig::default()).unwrap();
        assert_eq!(archive.load_all_pending(), vec![first]);
        assert_eq!(
            archive.replay_summary(),
            ReplaySummary {
                frames: 3,
                live_records: 1,
                torn_bytes: 0
            }
        );
    }

    #[test]
    fn pending_is_in_creation_order() {
        let mut archive = TempRecordArchive::in_memory();
        let batches: Vec<_> = [5, 1, 3].iter().map(|seq| batch("P1", *seq)).collect();
        for b in &batches {
            archive.append(b).unwrap();
        }

        let seqs: Vec<u64> = archive
            .load_all_pending()
            .iter()
            .map(|b| b.created_at().sequence)
            .collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    #[test]
    fn escalated_records_are_not_pending() {
        let mut archive = TempRecordArchive::in_memory();
        let b = batch("P1", 1);
        archive
            .put(ArchiveRecord::from_batch(&b, ArchivePhase::Escalated, 5))
            .unwrap();

        assert!(archive.load_all_pending().is_empty());
        assert_eq!(archive.escalated().len(), 1);
        assert_eq!(archive.get(b.session_batch_id()).unwrap().retry_count, 5);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let storage = MemoryArchiveStorage::new();
        let kept = batch("P1", 1);
        {
            let mut archive = TempRecordArchive::open(storage.clone(), ArchiveConfig::default())
                .unwrap();
            archive.append(&kept).unwrap();
        }
        let clean_len = storage.data().len();

        let torn = ArchiveFrame::Upsert(ArchiveRecord::from_batch(
            &batch("P1", 2),
            ArchivePhase::Queued,
            0,
        ))
        .encode()
        .unwrap();
        let mut bytes = storage.data();
        bytes.extend_from_slice(&torn[..torn.len() - 3]);
        let storage = MemoryArchiveStorage::with_data(bytes);

        let archive = TempRecordArchive::open(storage.clone(), ArchiveConfig::default()).unwrap();
        assert_eq!(archive.load_all_pending(), vec![kept]);
        assert!(archive.replay_summary().torn_bytes > 0);
        assert_eq!(storage.data().len(), clean_len);
    }

    #[test]
    fn tampered_record_fails_open() {
        let mut record =
            ArchiveRecord::from_batch(&batch("P1", 1), ArchivePhase::Submitted, 1);
        record.instructions.insert("gold", 1_000_000i64);
        let bytes = ArchiveFrame::Upsert(record).encode().unwrap();

        let result =
            TempRecordArchive::open(MemoryArchiveStorage::with_data(bytes), ArchiveConfig::default());
        assert!(matches!(result, Err(ArchiveError::StoredHashMismatch(_))));
    }

    #[test]
    fn compaction_keeps_live_records() {
        let storage = MemoryArchiveStorage::new();
        let config = ArchiveConfig::default().with_compact_threshold(0);
        let mut archive = TempRecordArchive::open(storage.clone(), config.clone()).unwrap();

        let live = batch("P1", 1);
        archive.append(&live).unwrap();
        for seq in 2..10 {
            let b = batch("P1", seq);
            archive.append(&b).unwrap();
            archive.remove(b.session_batch_id()).unwrap();
        }
        archive
            .put(ArchiveRecord::from_batch(&live, ArchivePhase::Submitted, 1))
            .unwrap();
        assert_eq!(archive.superseded_count(), 17);

        let stats = archive.compact().unwrap();
        assert_eq!(stats.frames_before, 18);
        assert_eq!(stats.frames_after, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(archive.superseded_count(), 0);

        let reopened = TempRecordArchive::open(storage, config).unwrap();
        let record = reopened.get(live.session_batch_id()).unwrap();
        assert_eq!(record.phase, ArchivePhase::Submitted);
        assert_eq!(record.retry_count, 1);
    }

    #[test]
    fn auto_compaction_at_threshold() {
        let config = ArchiveConfig::default().with_compact_threshold(4);
        let mut archive =
            TempRecordArchive::open(MemoryArchiveStorage::new(), config).unwrap();

        for seq in 0..3 {
            let b = batch("P1", seq);
            archive.append(&b).unwrap();
            archive.remove(b.session_batch_id()).unwrap();
        }
        // 6 frames, none live: compaction ran once superseded hit 4
        assert!(archive.superseded_count() < 4);
    }

    #[test]
    fn file_archive_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saves.archive");
        let b = batch("P7", 42);

        {
            let mut archive = TempRecordArchive::open_file(&path, ArchiveConfig::default()).unwrap();
            archive.append(&b).unwrap();
        }

        let archive = TempRecordArchive::open_file(&path, ArchiveConfig::default()).unwrap();
        assert_eq!(archive.load_all_pending(), vec![b]);
    }
}
