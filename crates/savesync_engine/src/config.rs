//! Configuration for the save sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for batching and delivery.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Coalescing window: routine batches are sealed and flushed once their
    /// first instruction is this old.
    pub flush_interval: Duration,
    /// Number of instructions at which an open batch is sealed early.
    pub max_open_instructions: usize,
    /// Number of instructions at which an open batch becomes `Heavy`.
    pub heavy_threshold: usize,
    /// Deadline for a receipt after a batch is submitted.
    pub receipt_timeout: Duration,
    /// Period of the background driver.
    pub tick_interval: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            max_open_instructions: 64,
            heavy_threshold: 16,
            receipt_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(250),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the coalescing window.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the size threshold that seals an open batch.
    pub fn with_max_open_instructions(mut self, max: usize) -> Self {
        self.max_open_instructions = max.max(1);
        self
    }

    /// Sets the instruction count at which a batch becomes `Heavy`.
    pub fn with_heavy_threshold(mut self, threshold: usize) -> Self {
        self.heavy_threshold = threshold;
        self
    }

    /// Sets the receipt deadline.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Sets the driver period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which a batch is escalated.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that escalates on the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if a batch with `retry_count` failures must be escalated.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Calculates the delay before retry number `retry_count` (1-based).
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry_count - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        let delay_secs = base_delay.min(cap);

        if self.add_jitter {
            // Up to 25% jitter, never past the cap
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64((delay_secs + jitter).min(cap))
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for the temp record archive.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Sync storage after every write.
    pub sync_on_write: bool,
    /// Number of superseded frames that triggers compaction.
    pub compact_threshold: usize,
}

impl ArchiveConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: 256,
        }
    }

    /// Sets whether every write is synced.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::new()
    }
}
