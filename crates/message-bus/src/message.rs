//! Messages flowing through the bus.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::Serialize;

use crate::BusError;

/// A message read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    /// Position of the message in its partition.
    pub offset: i64,
    /// Routing key (the step name for saga traffic).
    pub key: String,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// A message to be produced after a consumed message has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Encodes `value` as JSON for `topic` under `key`.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            payload: serde_json::to_vec(value)?,
        })
    }
}

/// Where a partition consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// The oldest offset still retained by the partition.
    Earliest,
    /// An explicit offset; rejected when outside the retained range.
    At(i64),
}

/// An item yielded by a partition consumer, in arrival order.
#[derive(Debug)]
pub enum ConsumerEvent {
    Message(BusMessage),
    Error(BusError),
}

/// Stream of consumer events. Dropping the stream closes the consumer.
pub type ConsumerStream = Pin<Box<dyn Stream<Item = ConsumerEvent> + Send>>;

/// An open partition consumer.
pub struct Subscription {
    /// The offset the consumer actually started from.
    pub start_offset: i64,
    pub stream: ConsumerStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("start_offset", &self.start_offset)
            .finish_non_exhaustive()
    }
}
