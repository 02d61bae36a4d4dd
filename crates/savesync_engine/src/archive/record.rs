//! Archive records and their on-disk framing.
//!
//! Every frame has the layout:
//!
//! ```text
//! | len (4, LE) | op (1) | payload (len - 9) | crc32 (4, LE) |
//! ```
//!
//! `len` is the whole frame length and the CRC covers every byte before it.
//! An `Upsert` payload is a CBOR-encoded [`ArchiveRecord`]; a `Remove`
//! payload is the 16 raw bytes of a session batch ID.

use crate::error::{ArchiveError, ArchiveResult};
use bytes::{Buf, BufMut, BytesMut};
use savesync_protocol::{
    BatchKind, BatchTimestamp, Instructions, PlayerId, SaveBatch, SaveHash, SessionBatchId,
};
use serde::{Deserialize, Serialize};

/// Bytes of frame overhead: length, op and CRC.
pub const FRAME_OVERHEAD: usize = 9;

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Delivery phase persisted alongside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchivePhase {
    /// Sealed but never submitted.
    Queued,
    /// Submitted at least once and awaiting a verified receipt.
    Submitted,
    /// Retries exhausted; kept until manually dismissed.
    Escalated,
}

impl ArchivePhase {
    /// Returns a short lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            ArchivePhase::Queued => "queued",
            ArchivePhase::Submitted => "submitted",
            ArchivePhase::Escalated => "escalated",
        }
    }
}

/// Durable copy of a batch plus its tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Batch identifier; the archive key.
    pub session_batch_id: SessionBatchId,
    /// Owning player.
    pub player_id: PlayerId,
    /// Batch kind.
    pub kind: BatchKind,
    /// Creation timestamp.
    pub created_at: BatchTimestamp,
    /// Urgency flag.
    pub urgent: bool,
    /// Save instructions.
    pub instructions: Instructions,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Delivery phase.
    pub phase: ArchivePhase,
    /// Hash the server must echo back.
    pub expected_hash: SaveHash,
}

impl ArchiveRecord {
    /// Creates a record for `batch`.
    pub fn from_batch(batch: &SaveBatch, phase: ArchivePhase, retry_count: u32) -> Self {
        Self {
            session_batch_id: batch.session_batch_id(),
            player_id: batch.player_id().clone(),
            kind: batch.kind(),
            created_at: batch.created_at(),
            urgent: batch.is_urgent(),
            instructions: batch.instructions().clone(),
            retry_count,
            phase,
            expected_hash: batch.expected_hash(),
        }
    }

    /// Rebuilds the batch this record was made from.
    pub fn to_batch(&self) -> SaveBatch {
        let mut batch = SaveBatch::create(
            self.kind,
            self.player_id.clone(),
            self.session_batch_id,
            self.created_at,
            self.instructions.clone(),
        );
        if self.urgent {
            batch.mark_urgent();
        }
        batch
    }

    /// Returns a copy of this record in another phase.
    #[must_use]
    pub fn with_phase(&self, phase: ArchivePhase, retry_count: u32) -> Self {
        Self {
            phase,
            retry_count,
            ..self.clone()
        }
    }

    /// Checks the stored hash against the stored instructions.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::StoredHashMismatch`] if they differ.
    pub fn verify_hash(&self) -> ArchiveResult<()> {
        if self.instructions.save_hash() == self.expected_hash {
            Ok(())
        } else {
            Err(ArchiveError::StoredHashMismatch(self.session_batch_id))
        }
    }
}

/// Operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameOp {
    /// Insert or replace a record.
    Upsert = 1,
    /// Delete a record.
    Remove = 2,
}

impl FrameOp {
    /// Converts a byte to an op.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Upsert),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A decoded archive frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFrame {
    /// Insert or replace a whole record.
    Upsert(ArchiveRecord),
    /// Delete the record with this ID.
    Remove(SessionBatchId),
}

impl ArchiveFrame {
    /// Returns the op of this frame.
    pub fn op(&self) -> FrameOp {
        match self {
            ArchiveFrame::Upsert(_) => FrameOp::Upsert,
            ArchiveFrame::Remove(_) => FrameOp::Remove,
        }
    }

    /// Returns the ID the frame applies to.
    pub fn session_batch_id(&self) -> SessionBatchId {
        match self {
            ArchiveFrame::Upsert(record) => record.session_batch_id,
            ArchiveFrame::Remove(id) => *id,
        }
    }

    /// Encodes the frame.
    pub fn encode(&self) -> ArchiveResult<Vec<u8>> {
        let payload = match self {
            ArchiveFrame::Upsert(record) => {
                let mut buf = Vec::new();
                ciborium::into_writer(record, &mut buf)
                    .map_err(|e| ArchiveError::Encoding(e.to_string()))?;
                buf
            }
            ArchiveFrame::Remove(id) => id.as_bytes().to_vec(),
        };

        let total = FRAME_OVERHEAD + payload.len();
        let len = u32::try_from(total)
            .map_err(|_| ArchiveError::Encoding(format!("frame of {total} bytes is too large")))?;

        let mut frame = BytesMut::with_capacity(total);
        frame.put_u32_le(len);
        frame.put_u8(self.op() as u8);
        frame.put_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.put_u32_le(crc);

        Ok(frame.to_vec())
    }

    fn decode_payload(op: FrameOp, payload: &[u8], offset: u64) -> ArchiveResult<Self> {
        match op {
            FrameOp::Upsert => {
                let record: ArchiveRecord = ciborium::from_reader(payload)
                    .map_err(|e| ArchiveError::corrupted(offset, e.to_string()))?;
                Ok(ArchiveFrame::Upsert(record))
            }
            FrameOp::Remove => {
                let bytes: [u8; 16] = payload.try_into().map_err(|_| {
                    ArchiveError::corrupted(
                        offset,
                        format!("remove payload must be 16 bytes, got {}", payload.len()),
                    )
                })?;
                Ok(ArchiveFrame::Remove(SessionBatchId::from_bytes(bytes)))
            }
        }
    }
}

/// Result of scanning raw archive bytes.
#[derive(Debug, Clone, Default)]
pub struct FrameScan {
    /// Decoded frames with their byte offsets.
    pub frames: Vec<(u64, ArchiveFrame)>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
    /// Bytes of an incomplete trailing frame, if any.
    pub torn_bytes: u64,
}

/// Decodes every complete frame in `data`.
///
/// A trailing frame cut short by a crash is reported in `torn_bytes` rather
/// than as an error.
///
/// # Errors
///
/// Returns [`ArchiveError::Corrupted`] for a checksum failure, an unknown op
/// or an undecodable payload.
pub fn scan_frames(data: &[u8]) -> ArchiveResult<FrameScan> {
    let mut scan = FrameScan::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let remaining = &data[pos..];

        if remaining.len() < LEN_SIZE {
            break;
        }
        let mut header = &remaining[..LEN_SIZE];
        let len = header.get_u32_le() as usize;

        if len < FRAME_OVERHEAD {
            return Err(ArchiveError::corrupted(
                offset,
                format!("frame length {len} is below the minimum"),
            ));
        }
        if remaining.len() < len {
            break;
        }

        let frame = &remaining[..len];
        let (body, crc_bytes) = frame.split_at(len - CRC_SIZE);
        let mut crc_buf = crc_bytes;
        let stored_crc = crc_buf.get_u32_le();
        let computed_crc = compute_crc32(body);
        if stored_crc != computed_crc {
            return Err(ArchiveError::corrupted(
                offset,
                format!("CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
            ));
        }

        let op = FrameOp::from_byte(body[LEN_SIZE])
            .ok_or_else(|| ArchiveError::corrupted(offset, format!("unknown op {}", body[LEN_SIZE])))?;
        let payload = &body[LEN_SIZE + 1..];
        scan.frames
            .push((offset, ArchiveFrame::decode_payload(op, payload, offset)?));

        pos += len;
    }

    scan.valid_len = pos as u64;
    scan.torn_bytes = (data.len() - pos) as u64;
    Ok(scan)
}

/// Computes the CRC32 (IEEE) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
