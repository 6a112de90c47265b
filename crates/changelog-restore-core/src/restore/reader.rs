//! Orchestrates state restoration across many changelog partitions on one
//! shared log consumer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::restorer::PartitionRestorer;
use crate::config::RestoreConfig;
use crate::error::Error;
use crate::log::{LogConsumer, PartitionInfo, PolledRecords, TopicPartition};
use crate::task::RestoringTask;
use crate::Result;

/// Replays changelog partitions into their local stores until each reaches
/// its completion point.
///
/// One instance is owned by a single stream thread. Each
/// [`restore`](ChangelogReader::restore) call performs at most one
/// initialization pass plus one bounded poll, so the owner controls the read
/// rate and can interleave restoration with its other work. The reader is
/// never invoked concurrently on itself.
pub struct ChangelogReader {
    consumer: Arc<dyn LogConsumer>,
    config: RestoreConfig,
    registered: HashMap<TopicPartition, PartitionRestorer>,
    needs_initializing: HashSet<TopicPartition>,
    needs_restoring: HashSet<TopicPartition>,
    end_offsets: HashMap<TopicPartition, i64>,
    partition_info: HashMap<String, Vec<PartitionInfo>>,
}

impl ChangelogReader {
    /// Create a reader over a dedicated restore consumer.
    ///
    /// The consumer must have no topic subscription; the reader manages its
    /// assignment exclusively for the duration of each `restore` call.
    pub fn new(consumer: Arc<dyn LogConsumer>) -> Self {
        Self::with_config(consumer, RestoreConfig::default())
    }

    /// Create a reader with explicit tuning.
    pub fn with_config(consumer: Arc<dyn LogConsumer>, config: RestoreConfig) -> Self {
        Self {
            consumer,
            config,
            registered: HashMap::new(),
            needs_initializing: HashSet::new(),
            needs_restoring: HashSet::new(),
            end_offsets: HashMap::new(),
            partition_info: HashMap::new(),
        }
    }

    /// Register a restorer and mark its partition as needing initialization.
    ///
    /// Idempotent per partition: a second registration keeps the existing
    /// restorer.
    pub fn register(&mut self, restorer: PartitionRestorer) {
        let partition = restorer.partition().clone();
        if !self.registered.contains_key(&partition) {
            trace!(partition = %partition, "added restorer for changelog");
            self.registered.insert(partition.clone(), restorer);
        }
        self.needs_initializing.insert(partition);
    }

    /// Perform one restoration pass and return the partitions restored so
    /// far.
    ///
    /// Transient metadata timeouts abandon the pass and are retried on the
    /// next call; progress made earlier in the call is kept even if a later
    /// partition fails.
    pub async fn restore<T: RestoringTask>(
        &mut self,
        restoring_tasks: &[T],
    ) -> Result<HashSet<TopicPartition>> {
        let consumer = Arc::clone(&self.consumer);
        let thread = self.config.thread_id.clone().unwrap_or_default();

        if !self.needs_initializing.is_empty() {
            self.initialize(restoring_tasks).await?;
        }

        if self.needs_restoring.is_empty() {
            consumer.assign(HashSet::new()).await?;
            return Ok(self.completed());
        }

        let mut partitions: Vec<TopicPartition> = self.needs_restoring.iter().cloned().collect();
        partitions.sort();

        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let records = match consumer.poll(timeout).await {
            Ok(records) => records,
            Err(Error::Consumer(e)) if e.is_retryable() => {
                debug!(%thread, error = %e, "poll timed out; will retry in the next run loop");
                return Ok(self.completed());
            }
            Err(e) => return Err(e),
        };

        for partition in &partitions {
            self.restore_partition(&records, partition).await?;
        }

        if self.needs_restoring.is_empty() {
            consumer.assign(HashSet::new()).await?;
        }

        Ok(self.completed())
    }

    /// Partitions whose restoration has finished, including those pruned
    /// during initialization. Partitions still waiting on metadata are not
    /// reported.
    pub fn completed(&self) -> HashSet<TopicPartition> {
        let completed: HashSet<TopicPartition> = self
            .registered
            .keys()
            .filter(|p| !self.needs_restoring.contains(p) && !self.needs_initializing.contains(p))
            .cloned()
            .collect();
        trace!(?completed, "completed partitions");
        completed
    }

    /// Read-only view of the restorer registered for `partition`, if any.
    pub fn restorer(&self, partition: &TopicPartition) -> Option<&PartitionRestorer> {
        self.registered.get(partition)
    }

    /// Current restored offset for every persistent restorer.
    pub fn restored_offsets(&self) -> HashMap<TopicPartition, i64> {
        self.registered
            .iter()
            .filter(|(_, restorer)| restorer.is_persistent())
            .map(|(partition, restorer)| (partition.clone(), restorer.restored_offset()))
            .collect()
    }

    /// Forget all registered partitions and cached metadata.
    ///
    /// The consumer's assignment is left untouched; after a rebalance the
    /// owner is responsible for it.
    pub fn reset(&mut self) {
        self.partition_info.clear();
        self.registered.clear();
        self.needs_restoring.clear();
        self.end_offsets.clear();
        self.needs_initializing.clear();
    }

    async fn initialize<T: RestoringTask>(&mut self, restoring_tasks: &[T]) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let thread = self.config.thread_id.clone().unwrap_or_default();

        let subscription = consumer.subscription().await?;
        if !subscription.is_empty() {
            return Err(Error::IllegalState(format!(
                "restore consumer should not be subscribed to any topics ({:?})",
                subscription
            )));
        }

        // Metadata may still be missing for some registered partitions;
        // refresh before deciding which are initializable.
        self.refresh_partition_info().await?;

        let mut initializable: Vec<TopicPartition> = self
            .needs_initializing
            .iter()
            .filter(|partition| self.has_partition(partition))
            .cloned()
            .collect();
        initializable.sort();

        if initializable.is_empty() {
            return Ok(());
        }

        match consumer.end_offsets(&initializable).await {
            Ok(offsets) => {
                self.end_offsets.extend(offsets);
            }
            Err(Error::Consumer(e)) if e.is_retryable() => {
                debug!(
                    %thread,
                    partitions = ?initializable,
                    error = %e,
                    "could not fetch end offsets; will retry in the next run loop"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // Prune partitions that already hold all of their data.
        let mut survivors = Vec::new();
        for partition in initializable {
            let Some(&end_offset) = self.end_offsets.get(&partition) else {
                info!(
                    %thread,
                    partition = %partition,
                    "end offset missing from the returned metadata; removing this partition from the current run loop"
                );
                continue;
            };
            let restorer = self
                .registered
                .get_mut(&partition)
                .ok_or_else(|| unregistered(&partition))?;
            match restorer.checkpoint_offset() {
                Some(checkpoint) if checkpoint >= end_offset => {
                    restorer.set_restored_offset(checkpoint);
                }
                _ if restorer.offset_limit() == Some(0) || end_offset == 0 => {
                    restorer.set_restored_offset(0);
                }
                _ => survivors.push(partition.clone()),
            }
            self.needs_initializing.remove(&partition);
        }

        if !survivors.is_empty() {
            self.start_restoration(survivors, restoring_tasks).await?;
        }
        Ok(())
    }

    async fn refresh_partition_info(&mut self) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let thread = self.config.thread_id.clone().unwrap_or_default();
        match consumer.list_topics().await {
            Ok(info) => {
                self.partition_info.extend(info);
            }
            Err(Error::Consumer(e)) if e.is_retryable() => {
                debug!(
                    %thread,
                    error = %e,
                    "could not fetch topic metadata within the timeout; will retry in the next run loop"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn has_partition(&self, partition: &TopicPartition) -> bool {
        self.partition_info
            .get(&partition.topic)
            .map(|infos| {
                infos
                    .iter()
                    .any(|info| info.partition_id == partition.partition)
            })
            .unwrap_or(false)
    }

    async fn start_restoration<T: RestoringTask>(
        &mut self,
        survivors: Vec<TopicPartition>,
        restoring_tasks: &[T],
    ) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let thread = self.config.thread_id.clone().unwrap_or_default();
        debug!(%thread, partitions = ?survivors, "start restoring state stores from changelogs");

        let mut assignment = consumer.assignment().await?;
        assignment.extend(survivors.iter().cloned());
        consumer.assign(assignment).await?;

        let mut needs_position_update = Vec::new();
        for partition in &survivors {
            let checkpoint = self
                .registered
                .get(partition)
                .ok_or_else(|| unregistered(partition))?
                .checkpoint_offset();
            match checkpoint {
                Some(checkpoint) => {
                    consumer.seek(partition, checkpoint).await?;
                    let position = consumer.position(partition).await?;
                    let end_offset = self.end_offset_for(partition)?;
                    debug!(
                        %thread,
                        partition = %partition,
                        starting_offset = position,
                        end_offset,
                        "restoring partition from checkpoint"
                    );
                    let restorer = self
                        .registered
                        .get_mut(partition)
                        .ok_or_else(|| unregistered(partition))?;
                    restorer.set_starting_offset(position);
                    let ending_offset = restorer.read_to(end_offset);
                    restorer.notify_started(ending_offset);
                }
                None => {
                    consumer
                        .seek_to_beginning(std::slice::from_ref(partition))
                        .await?;
                    needs_position_update.push(partition.clone());
                }
            }
        }

        let mut reinitialized = HashSet::new();
        for partition in needs_position_update {
            let Some(task) = restoring_tasks.iter().find(|task| {
                task.changelog_partitions().contains(&partition)
                    || task.source_partitions().contains(&partition)
            }) else {
                continue;
            };

            let position = consumer.position(&partition).await?;
            if task.exactly_once_enabled() {
                let store_name = self
                    .registered
                    .get(&partition)
                    .ok_or_else(|| unregistered(&partition))?
                    .store_name()
                    .to_owned();
                info!(
                    %thread,
                    partition = %partition,
                    store = %store_name,
                    "no checkpoint found for transactional store; reinitializing it from the beginning of the changelog"
                );
                let restorer = self
                    .registered
                    .get_mut(&partition)
                    .ok_or_else(|| unregistered(&partition))?;
                restorer.set_checkpoint_offset(position);
                // Replay waits for the next pass, which re-initializes the
                // partition from the fresh checkpoint.
                self.needs_initializing.insert(partition.clone());
                task.reinitialize_state_store(&partition)?;
                reinitialized.insert(partition);
            } else {
                let end_offset = self.end_offset_for(&partition)?;
                debug!(
                    %thread,
                    partition = %partition,
                    starting_offset = position,
                    end_offset,
                    "restoring state store from the beginning of the changelog"
                );
                let restorer = self
                    .registered
                    .get_mut(&partition)
                    .ok_or_else(|| unregistered(&partition))?;
                restorer.set_starting_offset(position);
                let ending_offset = restorer.read_to(end_offset);
                restorer.notify_started(ending_offset);
            }
        }

        self.needs_restoring.extend(
            survivors
                .into_iter()
                .filter(|partition| !reinitialized.contains(partition)),
        );
        Ok(())
    }

    async fn restore_partition(
        &mut self,
        records: &PolledRecords,
        partition: &TopicPartition,
    ) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let thread = self.config.thread_id.clone().unwrap_or_default();
        let end_offset = self.end_offset_for(partition)?;
        let restorer = self
            .registered
            .get_mut(partition)
            .ok_or_else(|| unregistered(partition))?;

        let mut batch_restored = 0u64;
        let mut completed_at = None;
        for record in records.records_for(partition) {
            if restorer.has_completed(record.offset, end_offset) {
                completed_at = Some(record.offset);
                break;
            }
            // Null-key records are markers, not state.
            if let Some(key) = &record.key {
                restorer.restore(key, record.value.as_ref())?;
                batch_restored += 1;
            }
        }

        let current_offset = match completed_at {
            Some(offset) => offset,
            None => consumer.position(partition).await?,
        };
        restorer.set_restored_offset(current_offset);
        if batch_restored > 0 {
            restorer.notify_batch_restored(current_offset, batch_restored);
        }

        if restorer.has_completed(current_offset, end_offset) {
            if current_offset > end_offset + 1 {
                return Err(Error::IllegalState(format!(
                    "log end offset of {} should not change while restoring: old end offset {}, current offset {}",
                    partition, end_offset, current_offset
                )));
            }
            debug!(
                %thread,
                partition = %partition,
                records = restorer.restored_count(),
                starting_offset = restorer.starting_offset(),
                restored_offset = restorer.restored_offset(),
                "completed restoring state from changelog"
            );
            restorer.notify_ended();
            self.needs_restoring.remove(partition);
        }
        Ok(())
    }

    fn end_offset_for(&self, partition: &TopicPartition) -> Result<i64> {
        self.end_offsets.get(partition).copied().ok_or_else(|| {
            Error::IllegalState(format!(
                "no end offset snapshot for restoring partition {}",
                partition
            ))
        })
    }
}

fn unregistered(partition: &TopicPartition) -> Error {
    Error::IllegalState(format!(
        "partition {} has no registered restorer",
        partition
    ))
}
