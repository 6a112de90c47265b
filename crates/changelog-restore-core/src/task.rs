//! Hooks into the stream tasks that own restoring partitions.

use std::collections::HashSet;

use crate::log::TopicPartition;
use crate::Result;

/// View of a restoring stream task consulted during initialization.
///
/// The reader only sees tasks through the slice passed into each
/// [`restore`](crate::ChangelogReader::restore) call; it keeps no reference
/// to them between calls.
pub trait RestoringTask: Send + Sync {
    /// Changelog partitions backing this task's stores.
    fn changelog_partitions(&self) -> HashSet<TopicPartition>;

    /// Source partitions the task consumes. A source topic may double as its
    /// own changelog.
    fn source_partitions(&self) -> HashSet<TopicPartition>;

    /// Whether the task runs with exactly-once processing, making local
    /// store state untrusted in the absence of a checkpoint.
    fn exactly_once_enabled(&self) -> bool;

    /// Discard and recreate the local store backed by `partition`.
    fn reinitialize_state_store(&self, partition: &TopicPartition) -> Result<()>;
}
