//! Error types for the save sync engine.

use savesync_protocol::{PlayerId, ProtocolError, SaveHash, SessionBatchId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that can occur while batching, tracking or delivering saves.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Two conflicting batches set a field to values that cannot be ordered.
    #[error("unresolvable conflict on {key:?} for player {player} between {earlier} and {later}")]
    ConflictUnresolvable {
        /// Player both batches belong to.
        player: PlayerId,
        /// First field path with non-comparable values.
        key: String,
        /// Older batch.
        earlier: SessionBatchId,
        /// Newer batch.
        later: SessionBatchId,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the submission can be retried.
        retryable: bool,
    },

    /// No receipt arrived before the deadline.
    #[error("submission timed out")]
    Timeout,

    /// The server stored something other than what was sent.
    #[error("hash mismatch for {session_batch_id}: expected {expected}, received {received}")]
    HashMismatch {
        /// Batch that failed verification.
        session_batch_id: SessionBatchId,
        /// Hash computed locally.
        expected: SaveHash,
        /// Hash reported by the server.
        received: SaveHash,
    },

    /// A batch used up its automatic retries.
    #[error("batch {session_batch_id} escalated after {retries} failed attempts")]
    RetriesExhausted {
        /// Escalated batch.
        session_batch_id: SessionBatchId,
        /// Number of failed attempts.
        retries: u32,
    },

    /// No record exists for this batch.
    #[error("unknown batch {0}")]
    UnknownBatch(SessionBatchId),

    /// A record for this batch already exists.
    #[error("batch {0} is already tracked")]
    DuplicateBatch(SessionBatchId),

    /// A receipt named a different player than the tracked batch.
    #[error("receipt for {session_batch_id} names player {actual}, expected {expected}")]
    PlayerMismatch {
        /// Batch the receipt refers to.
        session_batch_id: SessionBatchId,
        /// Player of the tracked batch.
        expected: PlayerId,
        /// Player named in the receipt.
        actual: PlayerId,
    },

    /// Invalid delivery state transition.
    #[error("invalid state transition for {session_batch_id} from {from} to {to}")]
    InvalidStateTransition {
        /// Batch whose state was being changed.
        session_batch_id: SessionBatchId,
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Archive error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::Timeout | EngineError::HashMismatch { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised by the temp record archive and its storage.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the archive lock.
    #[error("archive {0} is locked by another process")]
    Locked(PathBuf),

    /// A frame failed its checksum or could not be parsed.
    #[error("archive corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A stored expected hash no longer matches the stored instructions.
    #[error("stored hash of {0} does not match its instructions")]
    StoredHashMismatch(SessionBatchId),

    /// Failed to encode a record.
    #[error("record encoding failed: {0}")]
    Encoding(String),
}

impl ArchiveError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::transport_retryable("connection lost").is_retryable());
        assert!(!EngineError::transport_fatal("bad certificate").is_retryable());
        assert!(EngineError::Timeout.is_retryable());
        assert!(EngineError::HashMismatch {
            session_batch_id: SessionBatchId::new_random(),
            expected: SaveHash::compute(b"a"),
            received: SaveHash::compute(b"b"),
        }
        .is_retryable());
        assert!(!EngineError::UnknownBatch(SessionBatchId::new_random()).is_retryable());
    }

    #[test]
    fn archive_error_converts() {
        let err: EngineError = ArchiveError::corrupted(12, "bad crc").into();
        assert!(err.to_string().contains("offset 12"));
        assert!(!err.is_retryable());
    }
}
