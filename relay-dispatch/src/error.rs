//! Dispatch commit-path error types.

use relay_core::{Offset, TopicPartition};
use thiserror::Error;

/// Result type for dispatch commit-path operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur on the dispatch commit path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A terminal notification arrived for a partition that was never seeded.
    ///
    /// The dispatch pipeline skipped `record_received` for this partition,
    /// or kept dispatching after the partition was revoked.
    #[error("partition {partition} is not tracked (offset {offset})")]
    UntrackedPartition {
        /// The partition that has no tracker.
        partition: TopicPartition,
        /// The offset of the offending record.
        offset: Offset,
    },

    /// The partition consumer client rejected a commit.
    #[error("commit of offset {offset} for {partition} failed: {message}")]
    CommitFailed {
        /// The partition that was being committed.
        partition: TopicPartition,
        /// The offset that was being committed.
        offset: Offset,
        /// Error message from the client.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(#[from] relay_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::PartitionId;

    #[test]
    fn test_error_display() {
        let err = DispatchError::UntrackedPartition {
            partition: TopicPartition::new("orders", PartitionId::new(4)),
            offset: Offset::new(17),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders/4"));
        assert!(msg.contains("17"));

        let err = DispatchError::CommitFailed {
            partition: TopicPartition::new("orders", PartitionId::new(0)),
            offset: Offset::new(100),
            message: "coordinator not available".into(),
        };
        assert!(err.to_string().contains("coordinator not available"));
    }

    #[test]
    fn test_config_error_conversion() {
        let core = relay_core::Error::InvalidArgument {
            name: "tracker_shrink_threshold_blocks",
            reason: "must be positive",
        };
        let err: DispatchError = core.clone().into();
        assert_eq!(err, DispatchError::Config(core));
    }
}
