use async_trait::async_trait;
use serde::Serialize;

use crate::message::{StartOffset, Subscription};
use crate::{BusError, Result};

/// The partition every marketplace topic is produced to and consumed from.
pub const DEFAULT_PARTITION: i32 = 0;

/// Core trait for message bus clients.
///
/// Producing is fire-and-forget beyond the broker acknowledgement. Consumers
/// never commit offsets on their own; callers checkpoint explicitly.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Appends a key-tagged message to `topic` and returns its offset.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<i64>;

    /// Opens a partition consumer at `start`.
    ///
    /// Fails with `OffsetOutOfRange` when an explicit offset is not retained.
    async fn subscribe(&self, topic: &str, partition: i32, start: StartOffset)
    -> Result<Subscription>;

    /// Returns the oldest retained offset of a partition.
    async fn earliest_offset(&self, topic: &str, partition: i32) -> Result<i64>;

    /// Returns the offset the next produced message will receive.
    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64>;
}

/// Extension trait providing convenience methods for message buses.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Opens a resumable partition consumer.
    ///
    /// Tries `from_offset` first. If the broker rejects it, retries once from
    /// the earliest retained offset; when that also fails the consumer is
    /// reported as `ConsumerUnavailable`.
    async fn open_consumer(
        &self,
        topic: &str,
        partition: i32,
        from_offset: i64,
    ) -> Result<Subscription> {
        match self
            .subscribe(topic, partition, StartOffset::At(from_offset))
            .await
        {
            Ok(subscription) => Ok(subscription),
            Err(err) => {
                tracing::warn!(
                    topic,
                    partition,
                    from_offset,
                    error = %err,
                    "resume offset rejected, retrying from earliest"
                );
                self.subscribe(topic, partition, StartOffset::Earliest)
                    .await
                    .map_err(|e| BusError::ConsumerUnavailable {
                        topic: topic.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }

    /// Encodes `value` as JSON and publishes it.
    async fn publish_json<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<i64> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, key, payload).await
    }
}

// Blanket implementation for all MessageBus implementations
impl<T: MessageBus + ?Sized> MessageBusExt for T {}
