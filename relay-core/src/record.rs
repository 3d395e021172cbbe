//! Kafka-style consumer record types.
//!
//! A `ConsumerRecord` is what the dispatch pipeline pulls from a partition
//! and hands to subscribers. The commit path only looks at where a record
//! came from:
//! - **Topic / partition**: the tracking unit
//! - **Offset**: position in the partition log
//!
//! The value is carried through for the pipeline's own use.

use std::sync::Arc;

use bytes::Bytes;

use crate::types::{PartitionId, TopicPartition};

/// Offset in a partition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the previous offset, or `None` at the start of the log.
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns this offset advanced by `count` positions.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0.saturating_add(count))
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// A single record read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    /// Topic the record was read from.
    pub topic: Arc<str>,
    /// Partition the record was read from.
    pub partition: PartitionId,
    /// Offset in the partition.
    pub offset: Offset,
    /// The record value/payload.
    pub value: Bytes,
}

impl ConsumerRecord {
    /// Creates a record read from `topic`/`partition` at `offset`.
    #[must_use]
    pub fn new(
        topic: impl Into<Arc<str>>,
        partition: PartitionId,
        offset: Offset,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value: value.into(),
        }
    }

    /// Creates a record positioned at `offset` of the given partition key.
    #[must_use]
    pub fn at(partition: &TopicPartition, offset: Offset, value: impl Into<Bytes>) -> Self {
        Self::new(
            Arc::clone(&partition.topic),
            partition.partition,
            offset,
            value,
        )
    }

    /// Returns the partition key this record belongs to.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition {
            topic: Arc::clone(&self.topic),
            partition: self.partition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_arithmetic() {
        let offset = Offset::new(41);
        assert_eq!(offset.prev(), Some(Offset::new(40)));
        assert_eq!(offset.advance(9).get(), 50);
        assert_eq!(Offset::new(0).prev(), None);
        assert_eq!(Offset::new(u64::MAX).advance(1).get(), u64::MAX);
    }

    #[test]
    fn test_record_new() {
        let record = ConsumerRecord::new("orders", PartitionId::new(2), Offset::new(10), "v");
        assert_eq!(record.value, Bytes::from_static(b"v"));
        assert_eq!(
            record.topic_partition(),
            TopicPartition::new("orders", PartitionId::new(2))
        );
    }

    #[test]
    fn test_record_at_partition_key() {
        let key = TopicPartition::new("orders", PartitionId::new(1));
        let record = ConsumerRecord::at(&key, Offset::new(3), Bytes::from_static(b"payload"));
        assert_eq!(record.topic_partition(), key);
        assert_eq!(record.offset, Offset::new(3));
        assert!(Arc::ptr_eq(&record.topic, &key.topic));
    }
}
