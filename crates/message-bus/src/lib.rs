//! Message bus client, checkpoint store and checkpointed consumer loop.
//!
//! - [`MessageBus`] produces key-tagged messages and opens partition consumers
//! - [`CheckpointStore`] keeps one durable read position per consumer scope
//! - [`CheckpointedConsumer`] resumes from the checkpoint, dispatches to a
//!   [`MessageProcessor`], and advances the checkpoint after each message

pub mod bus;
pub mod checkpoint;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;

pub use bus::{DEFAULT_PARTITION, MessageBus, MessageBusExt};
pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreExt, InMemoryCheckpointStore};
pub use consumer::{CheckpointedConsumer, Disposition, MessageProcessor};
pub use error::{BusError, CheckpointError, Result};
pub use memory::InMemoryMessageBus;
pub use message::{BusMessage, ConsumerEvent, ConsumerStream, OutboundMessage, StartOffset, Subscription};
pub use postgres::PostgresCheckpointStore;
