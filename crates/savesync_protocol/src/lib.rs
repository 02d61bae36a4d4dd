//! # SaveSync Protocol
//!
//! Data types shared by the save synchronization engine and its collaborators.
//!
//! This crate provides:
//! - `SaveBatch` and `BatchKind` (the unit of queued save instructions)
//! - `Instructions` and `InstructionValue` (field-path → value mappings)
//! - `BatchConflict` for colliding pending batches
//! - `SaveReceipt` and `SaveHash` for round-trip integrity verification
//! - Canonical CBOR encoding of instructions
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```
//! use savesync_protocol::{
//!     BatchKind, BatchTimestamp, Instructions, PlayerId, SaveBatch, SessionBatchId,
//! };
//!
//! let instructions: Instructions = [("gold", 5i64)].into_iter().collect();
//! let batch = SaveBatch::create(
//!     BatchKind::Slim,
//!     PlayerId::new("p1"),
//!     SessionBatchId::new_random(),
//!     BatchTimestamp::new(100, 0),
//!     instructions,
//! );
//! assert!(!batch.is_urgent());
//! assert_eq!(batch.expected_hash(), batch.instructions().save_hash());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batch;
mod canonical;
mod conflict;
mod error;
mod hash;
mod ids;
mod instructions;
mod receipt;
mod value;

pub use batch::{BatchKind, SaveBatch};
pub use canonical::{to_canonical_bytes, CanonicalEncoder};
pub use conflict::BatchConflict;
pub use error::{ProtocolError, ProtocolResult};
pub use hash::SaveHash;
pub use ids::{BatchTimestamp, PlayerId, SessionBatchId};
pub use instructions::Instructions;
pub use receipt::SaveReceipt;
pub use value::{InstructionValue, ValueKind};
