//! Configuration, terminal outcomes and commit status.

use relay_core::Offset;

// -----------------------------------------------------------------------------
// Dispatch Outcome
// -----------------------------------------------------------------------------

/// Final disposition of one dispatched record.
///
/// Every record pulled from a partition reaches exactly one of these.
/// Every outcome marks the offset as resolved; only the two successful
/// deliveries drive a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The subscriber accepted the event.
    Delivered,
    /// Delivery failed but the dead-letter sink accepted the event.
    DeadLettered,
    /// Delivery failed and the dead-letter sink rejected or was unreachable.
    ///
    /// The offset still counts as resolved so the partition keeps moving.
    /// Such a record is not redelivered after a restart once a later commit
    /// passes over it.
    DeadLetterFailed {
        /// Why the dead-letter delivery failed.
        cause: String,
    },
    /// The record did not pass the trigger filter and was never dispatched.
    Discarded,
}

impl DispatchOutcome {
    /// Returns true if this outcome attempts a commit after resolving.
    #[must_use]
    pub const fn attempts_commit(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }

    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::DeadLettered => "dead_lettered",
            Self::DeadLetterFailed { .. } => "dead_letter_failed",
            Self::Discarded => "discarded",
        }
    }
}

// -----------------------------------------------------------------------------
// Commit Status
// -----------------------------------------------------------------------------

/// How an issued commit request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    /// The partition consumer client durably stored the offset.
    Committed {
        /// Next offset to read, as committed.
        offset: Offset,
        /// Number of offsets folded into this commit.
        count: u64,
    },
    /// The partition consumer client rejected the commit.
    ///
    /// Not retried: the next commit for the partition supersedes it.
    Failed {
        /// The offset that was not committed.
        offset: Offset,
        /// Error message from the client.
        reason: String,
    },
    /// The commit path was shut down before the request completed.
    Abandoned {
        /// The offset that was not committed.
        offset: Offset,
    },
}

impl CommitStatus {
    /// Returns true if the commit was stored.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Returns the offset this commit request carried.
    #[must_use]
    pub const fn offset(&self) -> Offset {
        match self {
            Self::Committed { offset, .. }
            | Self::Failed { offset, .. }
            | Self::Abandoned { offset } => *offset,
        }
    }
}

// -----------------------------------------------------------------------------
// Dispatch Config
// -----------------------------------------------------------------------------

/// Default number of 64-bit blocks a tracker may keep across a reset.
///
/// 128 blocks is 8192 offsets held back behind one slow record.
pub const DEFAULT_TRACKER_SHRINK_THRESHOLD_BLOCKS: usize = 128;

/// Configuration for the commit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Trackers whose bitmap grew beyond this many blocks drop it on reset
    /// and start over with a single block; smaller bitmaps are zeroed in
    /// place.
    pub tracker_shrink_threshold_blocks: usize,
}

impl DispatchConfig {
    /// Creates config with production defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tracker_shrink_threshold_blocks: DEFAULT_TRACKER_SHRINK_THRESHOLD_BLOCKS,
        }
    }

    /// Creates config for testing with a small shrink threshold.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            tracker_shrink_threshold_blocks: 4,
        }
    }

    /// Builder: set the tracker shrink threshold.
    #[must_use]
    pub const fn with_tracker_shrink_threshold_blocks(mut self, blocks: usize) -> Self {
        self.tracker_shrink_threshold_blocks = blocks;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the shrink threshold is zero.
    pub const fn validate(&self) -> relay_core::Result<()> {
        if self.tracker_shrink_threshold_blocks == 0 {
            return Err(relay_core::Error::InvalidArgument {
                name: "tracker_shrink_threshold_blocks",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
