use async_trait::async_trait;
use domain::{SagaStepResult, StepKey};
use message_bus::{BusMessage, Disposition, MessageProcessor};

use crate::rpc::StepRpc;

/// Checkpoint scope of the response consumer.
pub const RESPONSE_SCOPE: &str = "payment";

/// Consumes step responses and wakes the waiting saga.
pub struct ResponseRouter<B> {
    rpc: StepRpc<B>,
}

impl<B> ResponseRouter<B> {
    pub fn new(rpc: StepRpc<B>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl<B: Send + Sync> MessageProcessor for ResponseRouter<B> {
    fn name(&self) -> &str {
        "saga-responses"
    }

    async fn process(&self, message: &BusMessage) -> Disposition {
        let Some(key) = StepKey::parse(&message.key) else {
            return Disposition::skipped(format!("unknown response key '{}'", message.key));
        };

        let result: SagaStepResult = match serde_json::from_slice(&message.value) {
            Ok(result) => result,
            Err(e) => return Disposition::rejected(format!("malformed step result: {e}")),
        };
        if result.step != key {
            return Disposition::rejected(format!(
                "response key '{}' does not match step '{}'",
                key, result.step
            ));
        }

        let correlation_id = result.correlation_id;
        if self.rpc.deliver(result) {
            Disposition::applied()
        } else {
            tracing::debug!(%correlation_id, step = %key, "no saga waiting for response");
            Disposition::skipped("no saga waiting")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use common::{ItemId, PlayerId, SagaId};
    use domain::{StepCommand, StepRequest};
    use message_bus::InMemoryMessageBus;

    use super::*;

    fn message(key: &str, value: Vec<u8>) -> BusMessage {
        BusMessage {
            topic: "payment".into(),
            partition: 0,
            offset: 0,
            key: key.into(),
            value,
            timestamp: Utc::now(),
        }
    }

    fn result() -> SagaStepResult {
        SagaStepResult::success(&StepRequest::new(
            SagaId::new(),
            StepCommand::Grant {
                player_id: PlayerId::new("p1"),
                item_id: ItemId::new("sword"),
            },
        ))
    }

    fn router() -> ResponseRouter<InMemoryMessageBus> {
        ResponseRouter::new(StepRpc::new(InMemoryMessageBus::new(), Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn unknown_key_is_skipped() {
        let disposition = router().process(&message("buy", b"{}".to_vec())).await;
        assert!(matches!(disposition, Disposition::Skipped { .. }));
    }

    #[tokio::test]
    async fn malformed_result_is_rejected() {
        let disposition = router().process(&message("grant", b"nope".to_vec())).await;
        assert!(matches!(disposition, Disposition::Rejected { .. }));
    }

    #[tokio::test]
    async fn mismatched_key_is_rejected() {
        let payload = serde_json::to_vec(&result()).unwrap();
        let disposition = router().process(&message("debit", payload)).await;
        assert!(matches!(disposition, Disposition::Rejected { .. }));
    }

    #[tokio::test]
    async fn response_without_waiter_is_skipped() {
        let payload = serde_json::to_vec(&result()).unwrap();
        let disposition = router().process(&message("grant", payload)).await;
        assert!(matches!(disposition, Disposition::Skipped { .. }));
    }
}
