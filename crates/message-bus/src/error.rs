use thiserror::Error;

/// Errors raised by the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint has been recorded for the scope yet.
    ///
    /// Callers treat this as "start of topic".
    #[error("No checkpoint recorded for scope '{0}'")]
    NotFound(String),

    /// The backing store could not be reached.
    #[error("Checkpoint store unavailable: {0}")]
    StoreUnavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CheckpointError {
    /// Returns true when the error only means "nothing recorded yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound(_))
    }
}

/// Errors raised by the message bus client and the consumer loop.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker did not accept a message.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The requested start offset is not (or no longer) valid for the partition.
    #[error(
        "Offset {offset} out of range for {topic}/{partition} (valid {earliest}..={latest})"
    )]
    OffsetOutOfRange {
        topic: String,
        partition: i32,
        offset: i64,
        earliest: i64,
        latest: i64,
    },

    /// A partition consumer could not be opened, even from the earliest offset.
    #[error("Consumer unavailable for topic '{topic}': {reason}")]
    ConsumerUnavailable { topic: String, reason: String },

    /// A message payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint store failure surfaced through the consumer loop.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
