//! Restore progress notifications.

use crate::log::TopicPartition;

/// Observer of per-partition restoration progress.
///
/// Every hook defaults to a no-op so implementations override only what
/// they report on.
pub trait RestoreListener: Send {
    /// The partition has been positioned and is about to replay from
    /// `starting_offset` up to `ending_offset`.
    fn on_restore_start(
        &mut self,
        partition: &TopicPartition,
        store_name: &str,
        starting_offset: i64,
        ending_offset: i64,
    ) {
        let _ = (partition, store_name, starting_offset, ending_offset);
    }

    /// A batch of records has been applied to the store.
    fn on_batch_restored(
        &mut self,
        partition: &TopicPartition,
        store_name: &str,
        batch_end_offset: i64,
        num_restored: u64,
    ) {
        let _ = (partition, store_name, batch_end_offset, num_restored);
    }

    /// The partition reached its completion point.
    fn on_restore_end(&mut self, partition: &TopicPartition, store_name: &str, total_restored: u64) {
        let _ = (partition, store_name, total_restored);
    }
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRestoreListener;

impl RestoreListener for NoopRestoreListener {}
