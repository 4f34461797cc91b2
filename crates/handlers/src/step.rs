//! Step dispatch shared by every domain event handler.

use async_trait::async_trait;
use domain::{PAYMENT_TOPIC, SagaStepResult, StepKey, StepRequest};
use message_bus::{BusMessage, Disposition, MessageProcessor, OutboundMessage};

use crate::Result;

/// What applying a step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A forward step; the result is sent back to the coordinator, failed or not.
    Reply(SagaStepResult),
    /// A compensation. `applied` is false when there was nothing to undo.
    Compensated { applied: bool },
}

/// A service's step logic.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Returns the name of this handler, used in logs.
    fn name(&self) -> &'static str;

    /// The inbound topic, also used as the checkpoint scope.
    fn topic(&self) -> &'static str;

    /// Returns true for the step keys this handler owns.
    fn accepts(&self, key: StepKey) -> bool;

    /// Applies a decoded request. Must be idempotent on the correlation id.
    ///
    /// Forward steps report domain failures inside the reply; only failed
    /// compensations surface as errors.
    async fn apply(&self, request: &StepRequest) -> Result<StepOutcome>;
}

/// Adapts a [`StepHandler`] to the consumer loop.
pub struct StepProcessor<H> {
    handler: H,
}

impl<H: StepHandler> StepProcessor<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: StepHandler> MessageProcessor for StepProcessor<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn process(&self, message: &BusMessage) -> Disposition {
        let Some(key) = StepKey::parse(&message.key).filter(|k| self.handler.accepts(*k)) else {
            return Disposition::skipped(format!(
                "key '{}' is not a {} step",
                message.key,
                self.handler.name()
            ));
        };

        let request = match StepRequest::decode(&message.key, &message.value) {
            Ok(request) => request,
            Err(e) => return Disposition::rejected(e.to_string()),
        };

        match self.handler.apply(&request).await {
            Ok(StepOutcome::Reply(result)) => {
                if let Some(reason) = result.error.as_deref() {
                    tracing::info!(
                        step = %key,
                        correlation_id = %request.correlation_id,
                        saga_id = %request.saga_id,
                        reason,
                        "step failed"
                    );
                }
                match OutboundMessage::json(PAYMENT_TOPIC, key.as_str(), &result) {
                    Ok(reply) => Disposition::reply(reply),
                    Err(e) => Disposition::rejected(format!("cannot encode result: {e}")),
                }
            }
            Ok(StepOutcome::Compensated { applied }) => {
                tracing::info!(
                    step = %key,
                    correlation_id = %request.correlation_id,
                    saga_id = %request.saga_id,
                    applied,
                    "compensation handled"
                );
                Disposition::applied()
            }
            Err(e) => {
                tracing::error!(
                    step = %key,
                    correlation_id = %request.correlation_id,
                    saga_id = %request.saga_id,
                    error = %e,
                    incident = "manual_reconciliation",
                    "compensation failed"
                );
                metrics::counter!("handler_compensation_failures_total", "step" => key.as_str())
                    .increment(1);
                Disposition::rejected(e.to_string())
            }
        }
    }
}
