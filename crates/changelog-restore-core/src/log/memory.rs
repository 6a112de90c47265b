//! In-memory log consumer for testing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{ChangelogRecord, LogConsumer, PartitionInfo, PolledRecords, TopicPartition};
use crate::error::ConsumerError;
use crate::Result;

/// In-memory log consumer backed by per-partition append-only logs.
///
/// Primarily useful for testing: partitions are seeded with records, poll
/// batches are bounded, and metadata calls can be made to time out to
/// exercise the reader's retry paths.
pub struct MemoryLogConsumer {
    inner: Mutex<Inner>,
    max_poll_records: usize,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<TopicPartition, PartitionLog>,
    topics: HashMap<String, Vec<PartitionInfo>>,
    assignment: HashSet<TopicPartition>,
    subscription: HashSet<String>,
    positions: HashMap<TopicPartition, i64>,
    list_topics_timeouts: u32,
    end_offsets_timeouts: u32,
}

/// Append-only record log for one partition. Offsets may contain gaps, as
/// they do in a compacted topic.
#[derive(Default)]
struct PartitionLog {
    records: Vec<ChangelogRecord>,
    log_start_offset: i64,
}

impl PartitionLog {
    fn high_watermark(&self) -> i64 {
        self.records
            .last()
            .map(|r| r.offset + 1)
            .unwrap_or(self.log_start_offset)
    }

    fn read_from(&self, offset: i64, max: usize) -> Vec<ChangelogRecord> {
        self.records
            .iter()
            .filter(|r| r.offset >= offset)
            .take(max)
            .cloned()
            .collect()
    }
}

impl MemoryLogConsumer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_poll_records: 500,
        }
    }

    /// Bound the number of records a single poll may return.
    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max;
        self
    }

    /// Make a topic with `partitions` partitions visible in metadata and
    /// create an empty log for each.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut inner = self.inner.lock();
        let infos = (0..partitions)
            .map(|p| PartitionInfo {
                partition_id: p,
                leader_id: 0,
            })
            .collect();
        inner.topics.insert(topic.to_string(), infos);
        for p in 0..partitions {
            inner.logs.entry(TopicPartition::new(topic, p)).or_default();
        }
    }

    /// Make a partition visible in metadata without backing it with a log,
    /// so `end_offsets` returns no entry for it.
    pub fn expose_partition(&self, partition: &TopicPartition) {
        let mut inner = self.inner.lock();
        let infos = inner.topics.entry(partition.topic.clone()).or_default();
        if !infos.iter().any(|i| i.partition_id == partition.partition) {
            infos.push(PartitionInfo {
                partition_id: partition.partition,
                leader_id: 0,
            });
        }
    }

    /// Append a record at the next offset and return the offset assigned.
    pub fn append(
        &self,
        partition: &TopicPartition,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> i64 {
        let mut inner = self.inner.lock();
        let log = inner.logs.entry(partition.clone()).or_default();
        let offset = log.high_watermark();
        log.records.push(ChangelogRecord {
            key: key.map(Bytes::copy_from_slice),
            value: value.map(Bytes::copy_from_slice),
            offset,
            timestamp: offset,
        });
        offset
    }

    /// Append a record at an explicit offset at or past the high watermark;
    /// the gap left behind mimics a compacted region of the log.
    pub fn append_at(
        &self,
        partition: &TopicPartition,
        offset: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) {
        let mut inner = self.inner.lock();
        let log = inner.logs.entry(partition.clone()).or_default();
        debug_assert!(
            offset >= log.high_watermark(),
            "offsets must be appended in ascending order"
        );
        log.records.push(ChangelogRecord {
            key: key.map(Bytes::copy_from_slice),
            value: value.map(Bytes::copy_from_slice),
            offset,
            timestamp: offset,
        });
    }

    /// Fail the next `n` `list_topics` calls with a timeout.
    pub fn fail_next_list_topics(&self, n: u32) {
        self.inner.lock().list_topics_timeouts = n;
    }

    /// Fail the next `n` `end_offsets` calls with a timeout.
    pub fn fail_next_end_offsets(&self, n: u32) {
        self.inner.lock().end_offsets_timeouts = n;
    }

    /// Subscribe the consumer to topics, as a misconfigured caller would.
    pub fn subscribe(&self, topics: &[&str]) {
        let mut inner = self.inner.lock();
        inner.subscription = topics.iter().map(|t| t.to_string()).collect();
    }
}

impl Default for MemoryLogConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogConsumer for MemoryLogConsumer {
    async fn subscription(&self) -> Result<HashSet<String>> {
        Ok(self.inner.lock().subscription.clone())
    }

    async fn assign(&self, partitions: HashSet<TopicPartition>) -> Result<()> {
        let mut inner = self.inner.lock();
        for partition in &partitions {
            if !inner.positions.contains_key(partition) {
                let start = inner
                    .logs
                    .get(partition)
                    .map(|l| l.log_start_offset)
                    .unwrap_or(0);
                inner.positions.insert(partition.clone(), start);
            }
        }
        inner.assignment = partitions;
        Ok(())
    }

    async fn assignment(&self) -> Result<HashSet<TopicPartition>> {
        Ok(self.inner.lock().assignment.clone())
    }

    async fn seek(&self, partition: &TopicPartition, offset: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.assignment.contains(partition) {
            return Err(unassigned(partition));
        }
        inner.positions.insert(partition.clone(), offset);
        Ok(())
    }

    async fn seek_to_beginning(&self, partitions: &[TopicPartition]) -> Result<()> {
        let mut inner = self.inner.lock();
        for partition in partitions {
            if !inner.assignment.contains(partition) {
                return Err(unassigned(partition));
            }
            let start = inner
                .logs
                .get(partition)
                .map(|l| l.log_start_offset)
                .unwrap_or(0);
            inner.positions.insert(partition.clone(), start);
        }
        Ok(())
    }

    async fn position(&self, partition: &TopicPartition) -> Result<i64> {
        let inner = self.inner.lock();
        if !inner.assignment.contains(partition) {
            return Err(unassigned(partition));
        }
        Ok(inner.positions.get(partition).copied().unwrap_or(0))
    }

    async fn poll(&self, timeout: Duration) -> Result<PolledRecords> {
        let batch = {
            let mut inner = self.inner.lock();
            let mut assigned: Vec<TopicPartition> = inner.assignment.iter().cloned().collect();
            assigned.sort();

            let mut budget = self.max_poll_records;
            let mut by_partition = HashMap::new();
            for partition in assigned {
                if budget == 0 {
                    break;
                }
                let position = inner.positions.get(&partition).copied().unwrap_or(0);
                let records = match inner.logs.get(&partition) {
                    Some(log) => log.read_from(position, budget),
                    None => continue,
                };
                if records.is_empty() {
                    continue;
                }
                budget -= records.len();
                let next = records[records.len() - 1].offset + 1;
                inner.positions.insert(partition.clone(), next);
                by_partition.insert(partition, records);
            }
            PolledRecords::new(by_partition)
        };

        if batch.is_empty() && !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }

    async fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        let mut inner = self.inner.lock();
        if inner.end_offsets_timeouts > 0 {
            inner.end_offsets_timeouts -= 1;
            return Err(ConsumerError::Timeout("end offsets".to_string()).into());
        }
        let mut offsets = HashMap::new();
        for partition in partitions {
            if let Some(log) = inner.logs.get(partition) {
                offsets.insert(partition.clone(), log.high_watermark());
            }
        }
        Ok(offsets)
    }

    async fn list_topics(&self) -> Result<HashMap<String, Vec<PartitionInfo>>> {
        let mut inner = self.inner.lock();
        if inner.list_topics_timeouts > 0 {
            inner.list_topics_timeouts -= 1;
            return Err(ConsumerError::Timeout("topic metadata".to_string()).into());
        }
        Ok(inner.topics.clone())
    }
}

fn unassigned(partition: &TopicPartition) -> crate::Error {
    ConsumerError::UnknownPartition {
        topic: partition.topic.clone(),
        partition: partition.partition,
    }
    .into()
}
