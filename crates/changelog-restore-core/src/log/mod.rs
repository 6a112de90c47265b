//! Log consumer contract and log-domain types.

mod memory;

pub use memory::MemoryLogConsumer;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Identity of one changelog partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// One record read from a changelog partition.
#[derive(Debug, Clone)]
pub struct ChangelogRecord {
    /// Record key; `None` marks a control record carrying no state.
    pub key: Option<Bytes>,
    /// Record value; `None` is a tombstone for the key.
    pub value: Option<Bytes>,
    /// Broker offset of the record.
    pub offset: i64,
    /// Broker timestamp in epoch milliseconds.
    pub timestamp: i64,
}

/// Partition metadata entry returned by [`LogConsumer::list_topics`].
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub partition_id: i32,
    pub leader_id: i32,
}

/// Records returned by one [`LogConsumer::poll`], grouped by partition.
///
/// Broker order is preserved within each partition; cross-partition order is
/// unspecified.
#[derive(Debug, Default)]
pub struct PolledRecords {
    by_partition: HashMap<TopicPartition, Vec<ChangelogRecord>>,
}

impl PolledRecords {
    pub fn new(by_partition: HashMap<TopicPartition, Vec<ChangelogRecord>>) -> Self {
        Self { by_partition }
    }

    /// Records polled for one partition, in broker order.
    pub fn records_for(&self, partition: &TopicPartition) -> &[ChangelogRecord] {
        self.by_partition
            .get(partition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the poll returned no records at all.
    pub fn is_empty(&self) -> bool {
        self.by_partition.values().all(Vec::is_empty)
    }
}

/// Contract the changelog reader requires from the log client.
///
/// All operations may fail with [`ConsumerError::Timeout`](crate::ConsumerError::Timeout),
/// which is retryable on a later pass; any other failure is fatal to the
/// current call.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Topics the consumer is subscribed to via pattern subscription.
    ///
    /// The reader requires this to stay empty; it manages explicit
    /// assignments only.
    async fn subscription(&self) -> Result<HashSet<String>>;

    /// Replace the consumer's partition assignment.
    async fn assign(&self, partitions: HashSet<TopicPartition>) -> Result<()>;

    /// Current partition assignment.
    async fn assignment(&self) -> Result<HashSet<TopicPartition>>;

    /// Position the consumer at `offset` for one assigned partition.
    async fn seek(&self, partition: &TopicPartition, offset: i64) -> Result<()>;

    /// Position the consumer at the beginning of each given partition.
    async fn seek_to_beginning(&self, partitions: &[TopicPartition]) -> Result<()>;

    /// Next offset the consumer would read for an assigned partition.
    async fn position(&self, partition: &TopicPartition) -> Result<i64>;

    /// Read at most one bounded batch from the assigned partitions.
    async fn poll(&self, timeout: Duration) -> Result<PolledRecords>;

    /// Exclusive upper bounds of available records, fetched in one batch.
    ///
    /// Entries may be missing for partitions the broker could not answer
    /// for.
    async fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>>;

    /// Topic metadata currently known to the cluster.
    async fn list_topics(&self) -> Result<HashMap<String, Vec<PartitionInfo>>>;
}
