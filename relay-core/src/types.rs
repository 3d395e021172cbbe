//! Partition identification.
//!
//! A `TopicPartition` is the unit of independent offset tracking: two keys
//! with different topics or partition numbers never share state.

use std::fmt;
use std::sync::Arc;

/// Partition number within a topic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Creates a partition ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw partition number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition({})", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<PartitionId> for u32 {
    fn from(id: PartitionId) -> Self {
        id.get()
    }
}

/// Key identifying one partition of one topic.
///
/// The topic name is reference counted so keys can be cloned into log
/// fields, commit requests and map entries without copying the string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: Arc<str>,
    /// Partition number.
    pub partition: PartitionId,
}

impl TopicPartition {
    /// Creates a new partition key.
    #[must_use]
    pub fn new(topic: impl Into<Arc<str>>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_partition_id_display() {
        let id = PartitionId::new(7);
        assert_eq!(format!("{id}"), "7");
        assert_eq!(format!("{id:?}"), "partition(7)");
    }

    #[test]
    fn test_topic_partition_equality() {
        let a = TopicPartition::new("orders", PartitionId::new(0));
        let b = TopicPartition::new(String::from("orders"), PartitionId::new(0));
        let c = TopicPartition::new("orders", PartitionId::new(1));
        let d = TopicPartition::new("payments", PartitionId::new(0));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let set: HashSet<TopicPartition> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_topic_partition_display() {
        let key = TopicPartition::new("knative-broker-default", PartitionId::new(3));
        assert_eq!(key.to_string(), "knative-broker-default/3");
        assert_eq!(key.topic(), "knative-broker-default");
    }

    #[test]
    fn test_topic_partition_clone_shares_topic() {
        let a = TopicPartition::new("orders", PartitionId::new(0));
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.topic, &b.topic));
    }
}
