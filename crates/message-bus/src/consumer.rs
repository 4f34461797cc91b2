//! Checkpointed partition consumer loop.
//!
//! A [`CheckpointedConsumer`] resumes a topic partition from its stored
//! checkpoint, hands every message to a [`MessageProcessor`], persists the
//! new read position once the processor has applied its side effect, and
//! only then produces the processor's reply. A crash anywhere in that
//! sequence replays the message on restart (at-least-once).

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::bus::{DEFAULT_PARTITION, MessageBus, MessageBusExt};
use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreExt};
use crate::message::{BusMessage, ConsumerEvent, OutboundMessage, Subscription};
use crate::{BusError, Result};

/// What a processor did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The message was handled; `reply` is produced after checkpointing.
    Applied { reply: Option<OutboundMessage> },
    /// The message is not addressed to this processor (unknown key).
    Skipped { reason: String },
    /// The message was addressed to this processor but cannot be handled
    /// (malformed payload). Replaying it would not help.
    Rejected { reason: String },
}

impl Disposition {
    /// An applied message with nothing to reply.
    pub fn applied() -> Self {
        Disposition::Applied { reply: None }
    }

    /// An applied message with a reply.
    pub fn reply(message: OutboundMessage) -> Self {
        Disposition::Applied {
            reply: Some(message),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Disposition::Skipped {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Disposition::Rejected {
            reason: reason.into(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Applied { .. } => "applied",
            Disposition::Skipped { .. } => "skipped",
            Disposition::Rejected { .. } => "rejected",
        }
    }
}

/// Turns consumed messages into local side effects.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Returns the name of this processor, used in logs.
    fn name(&self) -> &str;

    /// Handles one message. Must be safe to call again for the same message.
    async fn process(&self, message: &BusMessage) -> Disposition;
}

/// Resumable, checkpointed consumer of one topic partition.
pub struct CheckpointedConsumer<B, C> {
    bus: B,
    checkpoints: C,
    topic: String,
    partition: i32,
    scope: String,
}

impl<B, C> CheckpointedConsumer<B, C>
where
    B: MessageBus,
    C: CheckpointStore,
{
    /// Creates a consumer of `topic` whose checkpoint scope is the topic name.
    pub fn new(bus: B, checkpoints: C, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            bus,
            checkpoints,
            scope: topic.clone(),
            topic,
            partition: DEFAULT_PARTITION,
        }
    }

    /// Overrides the checkpoint scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Reads the checkpoint and opens the partition consumer there.
    ///
    /// A missing checkpoint starts at offset 0 and is recorded immediately.
    /// When the broker no longer retains the checkpointed offset the consumer
    /// restarts from the earliest retained offset and the returned checkpoint
    /// reflects that position.
    pub async fn resume(&self) -> Result<(Checkpoint, Subscription)> {
        let checkpoint = match self.checkpoints.get_offset(&self.scope).await {
            Ok(offset) => Checkpoint {
                scope: self.scope.clone(),
                offset,
            },
            Err(e) if e.is_not_found() => {
                let checkpoint = Checkpoint::start(&self.scope);
                self.checkpoints.save(&checkpoint).await?;
                checkpoint
            }
            Err(e) => return Err(BusError::Checkpoint(e)),
        };

        let subscription = self
            .bus
            .open_consumer(&self.topic, self.partition, checkpoint.offset)
            .await?;

        let checkpoint = if subscription.start_offset == checkpoint.offset {
            checkpoint
        } else {
            tracing::warn!(
                scope = %self.scope,
                checkpoint = checkpoint.offset,
                start_offset = subscription.start_offset,
                "checkpoint not retained by the broker, consumer restarted from earliest"
            );
            Checkpoint {
                scope: self.scope.clone(),
                offset: subscription.start_offset,
            }
        };

        Ok((checkpoint, subscription))
    }

    /// Runs the consumer loop until `shutdown` fires or the stream ends.
    ///
    /// Consumer error events are logged and skipped. Failing to read the
    /// checkpoint or to open the consumer is fatal and returned as an error.
    /// Returns the final checkpoint.
    #[tracing::instrument(skip_all, fields(topic = %self.topic, scope = %self.scope, processor = processor.name()))]
    pub async fn run<P>(&self, processor: &P, shutdown: CancellationToken) -> Result<Checkpoint>
    where
        P: MessageProcessor + ?Sized,
    {
        let (mut checkpoint, subscription) = self.resume().await?;
        let mut stream = subscription.stream;
        tracing::info!(offset = checkpoint.offset, "consumer started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("consumer received shutdown signal");
                    break;
                }
                event = stream.next() => match event {
                    Some(ConsumerEvent::Message(message)) => {
                        checkpoint = self.handle(processor, &message, checkpoint).await;
                    }
                    Some(ConsumerEvent::Error(err)) => {
                        tracing::warn!(error = %err, "consumer error event");
                    }
                    None => {
                        tracing::warn!("consumer stream closed");
                        break;
                    }
                }
            }
        }

        drop(stream);
        tracing::info!(offset = checkpoint.offset, "consumer stopped");
        Ok(checkpoint)
    }

    /// Handles a single message and returns the advanced checkpoint.
    ///
    /// Order: side effect, checkpoint upsert, reply. A failed upsert is
    /// logged and the in-memory checkpoint still advances, so the next
    /// accepted message writes a later offset.
    pub async fn handle<P>(
        &self,
        processor: &P,
        message: &BusMessage,
        checkpoint: Checkpoint,
    ) -> Checkpoint
    where
        P: MessageProcessor + ?Sized,
    {
        let disposition = processor.process(message).await;
        metrics::counter!(
            "consumer_messages_total",
            "scope" => self.scope.clone(),
            "disposition" => disposition.label()
        )
        .increment(1);

        match &disposition {
            Disposition::Applied { .. } => {
                tracing::info!(
                    key = %message.key,
                    offset = message.offset,
                    "message applied"
                );
            }
            Disposition::Skipped { reason } => {
                tracing::debug!(key = %message.key, offset = message.offset, %reason, "message skipped");
            }
            Disposition::Rejected { reason } => {
                tracing::warn!(
                    key = %message.key,
                    offset = message.offset,
                    value = %message.value_lossy(),
                    %reason,
                    "message rejected"
                );
            }
        }

        let next = checkpoint.advanced_past(message.offset);
        if let Err(e) = self.checkpoints.save(&next).await {
            metrics::counter!("consumer_checkpoint_failures_total", "scope" => self.scope.clone())
                .increment(1);
            tracing::error!(error = %e, offset = next.offset, "checkpoint upsert failed");
        }

        if let Disposition::Applied { reply: Some(reply) } = disposition
            && let Err(e) = self
                .bus
                .publish(&reply.topic, &reply.key, reply.payload)
                .await
        {
            tracing::error!(error = %e, topic = %reply.topic, key = %reply.key, "reply publish failed");
        }

        next
    }
}
