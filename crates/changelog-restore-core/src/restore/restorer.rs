//! Per-partition restoration state.

use bytes::Bytes;

use super::listener::{NoopRestoreListener, RestoreListener};
use crate::log::TopicPartition;
use crate::store::StateRestoreSink;
use crate::Result;

/// Restoration parameters, counters and completion predicate for one
/// changelog partition.
///
/// Offsets obey `checkpoint <= starting <= restored <= end + 1` for the
/// lifetime of a run, and `restored_offset` never decreases.
pub struct PartitionRestorer {
    partition: TopicPartition,
    store_name: String,
    persistent: bool,
    checkpoint_offset: Option<i64>,
    offset_limit: Option<i64>,
    starting_offset: i64,
    restored_offset: i64,
    restored_count: u64,
    sink: Box<dyn StateRestoreSink>,
    listener: Box<dyn RestoreListener>,
}

impl PartitionRestorer {
    /// Create a restorer for one changelog partition.
    ///
    /// `checkpoint_offset` is the first unread offset persisted by a prior
    /// run, or `None` when no checkpoint exists. `offset_limit` caps how far
    /// restoration proceeds; `None` disables the cap and `Some(0)` restores
    /// nothing.
    pub fn new(
        partition: TopicPartition,
        store_name: impl Into<String>,
        persistent: bool,
        offset_limit: Option<i64>,
        checkpoint_offset: Option<i64>,
        sink: impl StateRestoreSink + 'static,
    ) -> Self {
        Self {
            partition,
            store_name: store_name.into(),
            persistent,
            checkpoint_offset,
            offset_limit,
            starting_offset: 0,
            restored_offset: 0,
            restored_count: 0,
            sink: Box::new(sink),
            listener: Box::new(NoopRestoreListener),
        }
    }

    /// Attach a progress listener.
    pub fn with_listener(mut self, listener: impl RestoreListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Whether the backing store survives restarts. Progress of in-memory
    /// stores is not durably checkpointed.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn checkpoint_offset(&self) -> Option<i64> {
        self.checkpoint_offset
    }

    pub fn offset_limit(&self) -> Option<i64> {
        self.offset_limit
    }

    /// Position at which this run began reading.
    pub fn starting_offset(&self) -> i64 {
        self.starting_offset
    }

    /// Highest offset successfully applied in this run.
    pub fn restored_offset(&self) -> i64 {
        self.restored_offset
    }

    /// Number of records applied in this run.
    pub fn restored_count(&self) -> u64 {
        self.restored_count
    }

    /// Offset at which restoration stops for the given end offset.
    pub(crate) fn read_to(&self, end_offset: i64) -> i64 {
        match self.offset_limit {
            Some(limit) => end_offset.min(limit),
            None => end_offset,
        }
    }

    /// Whether `current_offset` has reached the completion point. Inclusive:
    /// a tie counts as complete.
    pub fn has_completed(&self, current_offset: i64, end_offset: i64) -> bool {
        current_offset >= self.read_to(end_offset)
    }

    /// Record where this run started reading. Monotonic: a replay of an
    /// already-covered range never moves the offset backwards.
    pub(crate) fn set_starting_offset(&mut self, offset: i64) {
        self.starting_offset = self.starting_offset.max(self.clamp(offset));
    }

    /// Advance the highest applied offset. Monotonic for the lifetime of the
    /// restorer.
    pub(crate) fn set_restored_offset(&mut self, offset: i64) {
        self.restored_offset = self.restored_offset.max(self.clamp(offset));
    }

    /// Replace the checkpoint. Only valid while the owning reader
    /// reinitializes a transactional store for this partition.
    pub(crate) fn set_checkpoint_offset(&mut self, offset: i64) {
        self.checkpoint_offset = Some(offset);
    }

    /// Apply one changelog record to the store.
    pub(crate) fn restore(&mut self, key: &Bytes, value: Option<&Bytes>) -> Result<()> {
        self.sink.restore(key, value)?;
        self.restored_count += 1;
        Ok(())
    }

    pub(crate) fn notify_started(&mut self, ending_offset: i64) {
        self.listener.on_restore_start(
            &self.partition,
            &self.store_name,
            self.starting_offset,
            ending_offset,
        );
    }

    pub(crate) fn notify_batch_restored(&mut self, batch_end_offset: i64, num_restored: u64) {
        self.listener.on_batch_restored(
            &self.partition,
            &self.store_name,
            batch_end_offset,
            num_restored,
        );
    }

    pub(crate) fn notify_ended(&mut self) {
        self.listener
            .on_restore_end(&self.partition, &self.store_name, self.restored_count);
    }

    fn clamp(&self, offset: i64) -> i64 {
        match self.offset_limit {
            Some(limit) => offset.min(limit),
            None => offset,
        }
    }
}
