//! The long-running handler process of a consuming service.

use domain::StepKey;
use message_bus::{
    BusMessage, Checkpoint, CheckpointStore, CheckpointedConsumer, MessageBus,
};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::step::{StepHandler, StepProcessor};

/// A checkpointed consumer of a service's inbound topic driving a
/// [`StepHandler`].
///
/// The checkpoint scope is the topic name, so it records the shared read
/// position of the partition regardless of which keys were applied.
pub struct DomainEventHandler<B, C, H> {
    consumer: CheckpointedConsumer<B, C>,
    processor: StepProcessor<H>,
}

impl<B, C, H> DomainEventHandler<B, C, H>
where
    B: MessageBus,
    C: CheckpointStore,
    H: StepHandler,
{
    pub fn new(bus: B, checkpoints: C, handler: H) -> Self {
        let consumer = CheckpointedConsumer::new(bus, checkpoints, handler.topic());
        Self {
            consumer,
            processor: StepProcessor::new(handler),
        }
    }

    pub fn handler(&self) -> &H {
        self.processor.handler()
    }

    /// The step keys this handler applies.
    pub fn keys(&self) -> Vec<StepKey> {
        StepKey::ALL
            .into_iter()
            .filter(|k| self.handler().accepts(*k))
            .collect()
    }

    /// Consumes until `shutdown` fires and returns the final checkpoint.
    ///
    /// Fails only when the checkpoint cannot be read or the consumer cannot
    /// be opened.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Checkpoint> {
        tracing::info!(
            handler = self.handler().name(),
            keys = ?self.keys(),
            "domain event handler starting"
        );
        Ok(self.consumer.run(&self.processor, shutdown).await?)
    }

    /// Processes one message outside the loop and returns the next checkpoint.
    pub async fn handle(&self, message: &BusMessage, checkpoint: Checkpoint) -> Checkpoint {
        self.consumer
            .handle(&self.processor, message, checkpoint)
            .await
    }
}
