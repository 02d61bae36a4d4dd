//! # SaveSync Testkit
//!
//! Test utilities for SaveSync.
//!
//! This crate provides:
//! - Batch and receipt fixtures
//! - Property-based test generators using proptest
//! - Golden canonical-hash vectors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use savesync_testkit::prelude::*;
//!
//! #[test]
//! fn confirms_matching_receipt() {
//!     let batch = batch_at(BatchKind::Slim, "P1", 1, &[("gold", 5)]);
//!     assert!(receipt_for(&batch, batch.expected_hash()).hashes_match());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::vectors::*;
    pub use savesync_protocol::{
        BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SaveBatch, SaveHash,
        SaveReceipt, SessionBatchId,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use vectors::*;
