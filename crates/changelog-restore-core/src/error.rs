//! Error types for the changelog restore core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for changelog restoration.
#[derive(Error, Debug)]
pub enum Error {
    /// Log consumer error
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    /// State store sink failure while applying a record
    #[error("State store error: {0}")]
    Store(String),

    /// Task hook failure
    #[error("Task error: {0}")]
    Task(String),

    /// Detected inconsistency in reader or restorer state
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

/// Log-consumer-specific errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConsumerError {
    /// Metadata or fetch operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Partition not known to the consumer
    #[error("Partition {partition} not available for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// Authorization failure from the log broker
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Any other client failure
    #[error("Client error: {0}")]
    Client(String),
}

impl ConsumerError {
    /// Whether a later pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsumerError::Timeout(_))
    }
}
