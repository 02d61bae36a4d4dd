//! # SaveSync Engine
//!
//! Batching, conflict resolution and verified delivery of player saves.
//!
//! This crate provides:
//! - Conflict detection and last-writer-wins resolution of pending batches
//! - Merge coordination for batches queued side by side
//! - An unconfirmed-batch tracker with capped exponential backoff
//! - A durable temp record archive for crash and offline recovery
//! - The submission channel contract and a scripted mock
//! - The per-player engine and its periodic driver
//!
//! ## Guarantees
//!
//! - At most one batch per player is in flight; a player's batches are
//!   submitted in creation order
//! - A batch is archived before it is submitted and removed only once a
//!   receipt with a matching hash confirms it
//! - Every attempt resubmits the same batch, so its expected hash is stable
//! - A batch that exhausts its retries is escalated and kept, never dropped
//! - Pending batches in the archive are recovered before new instructions
//!   are accepted

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod archive;
mod channel;
mod clock;
mod config;
mod conflict;
mod engine;
mod error;
mod merge;
mod status;
mod tracker;

pub use archive::{
    compute_crc32, scan_frames, ArchiveFrame, ArchivePhase, ArchiveRecord, ArchiveStorage,
    CompactionStats, FileArchiveStorage, FrameOp, FrameScan, MemoryArchiveStorage, ReplaySummary,
    TempRecordArchive, FRAME_OVERHEAD,
};
pub use channel::{MockChannel, MockResponse, SubmissionChannel};
pub use clock::BatchClock;
pub use config::{ArchiveConfig, EngineConfig, RetryConfig};
pub use conflict::{BatchConflictDetector, BatchConflictResolver};
pub use engine::{SaveSyncEngine, UrgencyHint};
pub use error::{ArchiveError, ArchiveResult, EngineError, EngineResult};
pub use merge::{BatchMergeCoordinator, MergeOutcome};
pub use status::{EngineStats, SaveStatus, TickReport, UnconfirmedSave};
pub use tracker::{
    BatchState, DeliveryOutcome, RetryCause, UnconfirmedBatchRecord, UnconfirmedBatchTracker,
};
