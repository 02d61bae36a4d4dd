//! Server acknowledgements for submitted batches.

use crate::error::{ProtocolError, ProtocolResult};
use crate::hash::SaveHash;
use crate::ids::{PlayerId, SessionBatchId};
use serde::{Deserialize, Serialize};

/// Hash-bearing acknowledgement returned by the remote store.
///
/// A batch is confirmed only when `received_save_hash` equals
/// `expected_save_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    /// Player the batch belonged to.
    pub player_id: PlayerId,
    /// Batch this receipt acknowledges.
    pub session_batch_id: SessionBatchId,
    /// When the batch left the client (wall-clock millis).
    pub outbound_to_server_timestamp: u64,
    /// When the receipt arrived back (wall-clock millis).
    pub inbound_from_server_timestamp: u64,
    /// Hash the client expected the server to store.
    pub expected_save_hash: SaveHash,
    /// Hash of what the server actually stored.
    pub received_save_hash: SaveHash,
}

impl SaveReceipt {
    /// Creates a new receipt.
    #[must_use]
    pub fn new(
        player_id: PlayerId,
        session_batch_id: SessionBatchId,
        outbound_to_server_timestamp: u64,
        inbound_from_server_timestamp: u64,
        expected_save_hash: SaveHash,
        received_save_hash: SaveHash,
    ) -> Self {
        Self {
            player_id,
            session_batch_id,
            outbound_to_server_timestamp,
            inbound_from_server_timestamp,
            expected_save_hash,
            received_save_hash,
        }
    }

    /// Returns true if the stored content matches what was sent.
    #[must_use]
    pub fn hashes_match(&self) -> bool {
        self.received_save_hash == self.expected_save_hash
    }

    /// Round-trip time in milliseconds, if the timestamps are ordered.
    #[must_use]
    pub fn round_trip_millis(&self) -> Option<u64> {
        self.inbound_from_server_timestamp
            .checked_sub(self.outbound_to_server_timestamp)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
    }
}
