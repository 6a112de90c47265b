//! Reader bookkeeping: registration, initialization and offset reporting.

use std::sync::Arc;

use changelog_restore_core::{
    ChangelogReader, Error, InMemoryStore, LogConsumer, MemoryLogConsumer, PartitionRestorer,
};

use super::helpers::{
    no_tasks, partition, restore_until_complete, restorer_for, seed_records,
};

#[tokio::test]
async fn register_is_idempotent_per_partition() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 5);

    let first_store = InMemoryStore::new();
    let second_store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &first_store));
    reader.register(restorer_for(&tp, None, None, &second_store));

    let completed = restore_until_complete(&mut reader, &no_tasks(), 1).await;
    assert!(completed.contains(&tp));
    assert_eq!(first_store.len(), 5);
    assert!(second_store.is_empty());
}

#[tokio::test]
async fn initialize_rejects_a_subscribed_consumer() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    consumer.subscribe(&["some-input-topic"]);

    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&partition(0), None, None, &InMemoryStore::new()));

    let err = reader.restore(&no_tasks()).await.unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
}

#[tokio::test]
async fn metadata_timeout_abandons_the_pass_and_is_retried() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 3);
    consumer.fail_next_list_topics(1);

    let store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &store));

    let completed = reader.restore(&no_tasks()).await.unwrap();
    assert!(completed.is_empty());

    let completed = restore_until_complete(&mut reader, &no_tasks(), 1).await;
    assert!(completed.contains(&tp));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn end_offset_timeout_abandons_the_pass_and_is_retried() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 3);
    consumer.fail_next_end_offsets(1);

    let store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &store));

    let completed = reader.restore(&no_tasks()).await.unwrap();
    assert!(completed.is_empty());

    let completed = restore_until_complete(&mut reader, &no_tasks(), 1).await;
    assert!(completed.contains(&tp));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn partition_missing_from_metadata_stays_uninitialized() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    let tp = partition(0);

    let store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &store));

    for _ in 0..3 {
        assert!(reader.restore(&no_tasks()).await.unwrap().is_empty());
    }

    consumer.create_topic("store-changelog", 1);
    seed_records(&consumer, &tp, 3);

    let completed = restore_until_complete(&mut reader, &no_tasks(), 1).await;
    assert!(completed.contains(&tp));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn missing_end_offset_entry_keeps_the_partition_pending() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    let tp = partition(0);
    // visible in metadata, but the broker answers with no end offset for it
    consumer.expose_partition(&tp);

    let store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &store));

    assert!(reader.restore(&no_tasks()).await.unwrap().is_empty());

    consumer.create_topic("store-changelog", 1);
    seed_records(&consumer, &tp, 3);

    let completed = restore_until_complete(&mut reader, &no_tasks(), 1).await;
    assert!(completed.contains(&tp));
}

#[tokio::test]
async fn restored_offsets_cover_only_persistent_stores() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 2);
    let (p0, p1) = (partition(0), partition(1));
    seed_records(&consumer, &p0, 3);
    seed_records(&consumer, &p1, 3);

    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&p0, None, None, &InMemoryStore::new()));
    reader.register(PartitionRestorer::new(
        p1.clone(),
        "in-memory-store",
        false,
        None,
        None,
        InMemoryStore::new(),
    ));

    restore_until_complete(&mut reader, &no_tasks(), 2).await;

    let offsets = reader.restored_offsets();
    assert_eq!(offsets.get(&p0), Some(&3));
    assert!(!offsets.contains_key(&p1));
}

#[tokio::test]
async fn reset_forgets_registered_partitions() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 3);

    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &InMemoryStore::new()));
    restore_until_complete(&mut reader, &no_tasks(), 1).await;

    reader.reset();
    assert!(reader.completed().is_empty());
    assert!(reader.restored_offsets().is_empty());
    assert!(reader.restorer(&tp).is_none());
}

#[tokio::test]
async fn checkpoint_beyond_end_counts_as_restored() {
    // A checkpoint past the end offset means the log was truncated since the
    // last run; the prior state already covers everything that is left.
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 3);

    let store = InMemoryStore::new();
    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, Some(10), None, &store));

    let completed = reader.restore(&no_tasks()).await.unwrap();
    assert!(completed.contains(&tp));
    assert_eq!(reader.restorer(&tp).unwrap().restored_offset(), 10);
    assert!(store.is_empty());
}

#[tokio::test]
async fn assignment_is_cleared_once_everything_completes() {
    let consumer = Arc::new(MemoryLogConsumer::new());
    consumer.create_topic("store-changelog", 1);
    let tp = partition(0);
    seed_records(&consumer, &tp, 3);

    let mut reader = ChangelogReader::new(consumer.clone());
    reader.register(restorer_for(&tp, None, None, &InMemoryStore::new()));
    restore_until_complete(&mut reader, &no_tasks(), 1).await;

    assert!(consumer.assignment().await.unwrap().is_empty());
}
