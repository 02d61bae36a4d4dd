//! Submission channel abstraction.

use crate::clock::wall_millis;
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use savesync_protocol::{SaveBatch, SaveHash, SaveReceipt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Transport that delivers a batch to the remote store.
///
/// The engine only borrows the batch for one attempt and never calls
/// `submit` concurrently for the same player. Any error is treated like a
/// timeout and retried.
pub trait SubmissionChannel: Send + Sync {
    /// Sends `batch` and waits for the server's receipt.
    fn submit(&self, batch: &SaveBatch)
        -> impl Future<Output = EngineResult<SaveReceipt>> + Send;
}

impl<T: SubmissionChannel> SubmissionChannel for Arc<T> {
    fn submit(&self, batch: &SaveBatch) -> impl Future<Output = EngineResult<SaveReceipt>> + Send {
        (**self).submit(batch)
    }
}

/// Scripted behavior for one [`MockChannel`] submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Store the batch and echo its hash.
    Acknowledge,
    /// Return a receipt with a wrong received hash.
    CorruptHash,
    /// Fail with a retryable transport error.
    TransportError(String),
    /// Wait, then acknowledge.
    Delay(Duration),
}

/// An in-process channel for testing.
///
/// Responses are consumed in order; once the script is empty every
/// submission is acknowledged.
#[derive(Debug, Default)]
pub struct MockChannel {
    script: Mutex<VecDeque<MockResponse>>,
    submitted: Mutex<Vec<SaveBatch>>,
}

impl MockChannel {
    /// Creates a channel that acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel that plays `responses` first.
    pub fn scripted(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        let channel = Self::new();
        channel.push_responses(responses);
        channel
    }

    /// Appends responses to the script.
    pub fn push_responses(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.script.lock().extend(responses);
    }

    /// Returns every batch submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<SaveBatch> {
        self.submitted.lock().clone()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.submitted.lock().len()
    }

    fn receipt(batch: &SaveBatch, received: SaveHash, outbound: u64) -> SaveReceipt {
        SaveReceipt::new(
            batch.player_id().clone(),
            batch.session_batch_id(),
            outbound,
            wall_millis(),
            batch.expected_hash(),
            received,
        )
    }
}

impl SubmissionChannel for MockChannel {
    fn submit(&self, batch: &SaveBatch) -> impl Future<Output = EngineResult<SaveReceipt>> + Send {
        self.submitted.lock().push(batch.clone());
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(MockResponse::Acknowledge);
        let outbound = wall_millis();
        let batch = batch.clone();

        async move {
            match response {
                MockResponse::Acknowledge => {
                    Ok(Self::receipt(&batch, batch.expected_hash(), outbound))
                }
                MockResponse::CorruptHash => {
                    let mut wrong = batch.instructions().canonical_bytes();
                    wrong.push(0xFF);
                    Ok(Self::receipt(&batch, SaveHash::compute(&wrong), outbound))
                }
                MockResponse::TransportError(message) => {
                    Err(EngineError::transport_retryable(message))
                }
                MockResponse::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Self::receipt(&batch, batch.expected_hash(), outbound))
                }
            }
        }
    }
}
