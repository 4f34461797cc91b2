//! Request/response over the message bus.
//!
//! [`StepRpc::call`] publishes a step request and waits for the response
//! carrying the same correlation id. Responses are handed over by the
//! [`ResponseRouter`](crate::ResponseRouter), which consumes the payment
//! topic and calls [`StepRpc::deliver`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::CorrelationId;
use domain::{SagaStepResult, StepRequest};
use message_bus::{BusError, MessageBus, MessageBusExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Pending = HashMap<CorrelationId, oneshot::Sender<SagaStepResult>>;

/// How a step call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// A response arrived; it may still carry an error.
    Completed(SagaStepResult),
    /// No response within the timeout. The step may or may not have applied.
    TimedOut,
    /// The caller cancelled. `issued` is true when the request was published.
    Cancelled { issued: bool },
    /// The request never reached the bus.
    PublishFailed(String),
}

struct RpcInner<B> {
    bus: B,
    pending: Mutex<Pending>,
    timeout: Duration,
}

/// Correlated step calls over a message bus.
pub struct StepRpc<B> {
    inner: Arc<RpcInner<B>>,
}

impl<B> Clone for StepRpc<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Removes a waiter when the call ends, however it ends.
struct PendingGuard<'a, B> {
    rpc: &'a StepRpc<B>,
    correlation_id: CorrelationId,
}

impl<B> Drop for PendingGuard<'_, B> {
    fn drop(&mut self) {
        self.rpc.pending().remove(&self.correlation_id);
    }
}

impl<B> StepRpc<B> {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Hands a response to its waiter.
    ///
    /// Returns false when nobody waits for the correlation id (a late
    /// response after a timeout, or a replayed one).
    pub fn deliver(&self, result: SagaStepResult) -> bool {
        let waiter = self.pending().remove(&result.correlation_id);
        match waiter {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl<B: MessageBus> StepRpc<B> {
    pub fn new(bus: B, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                bus,
                pending: Mutex::new(HashMap::new()),
                timeout,
            }),
        }
    }

    pub fn bus(&self) -> &B {
        &self.inner.bus
    }

    /// Publishes `request` and waits for its response.
    ///
    /// The waiter is registered before publishing so a fast response cannot
    /// be missed. The wait ends on response, timeout or cancellation.
    pub async fn call(&self, request: &StepRequest, cancel: &CancellationToken) -> CallOutcome {
        if cancel.is_cancelled() {
            return CallOutcome::Cancelled { issued: false };
        }

        let (tx, rx) = oneshot::channel();
        self.pending().insert(request.correlation_id, tx);
        let _guard = PendingGuard {
            rpc: self,
            correlation_id: request.correlation_id,
        };

        if let Err(e) = self.send(request).await {
            return CallOutcome::PublishFailed(e.to_string());
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => CallOutcome::Cancelled { issued: true },
            received = tokio::time::timeout(self.inner.timeout, rx) => match received {
                Ok(Ok(result)) => CallOutcome::Completed(result),
                Ok(Err(_)) | Err(_) => CallOutcome::TimedOut,
            },
        }
    }

    /// Publishes `request` without waiting for a response.
    pub async fn send(&self, request: &StepRequest) -> Result<i64, BusError> {
        let key = request.key();
        self.inner
            .bus
            .publish_json(key.topic(), key.as_str(), request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use common::{ItemId, PlayerId, SagaId};
    use domain::{PLAYER_TOPIC, StepCommand};
    use message_bus::InMemoryMessageBus;

    use super::*;

    fn request() -> StepRequest {
        StepRequest::new(
            SagaId::new(),
            StepCommand::Grant {
                player_id: PlayerId::new("p1"),
                item_id: ItemId::new("sword"),
            },
        )
    }

    #[tokio::test]
    async fn call_completes_when_response_is_delivered() {
        let bus = InMemoryMessageBus::new();
        let rpc = StepRpc::new(bus.clone(), Duration::from_secs(5));
        let req = request();
        let cancel = CancellationToken::new();

        let responder = {
            let rpc = rpc.clone();
            let result = domain::SagaStepResult::success(&req);
            tokio::spawn(async move {
                while rpc.pending_count() == 0 {
                    tokio::task::yield_now().await;
                }
                assert!(rpc.deliver(result));
            })
        };

        let outcome = rpc.call(&req, &cancel).await;
        responder.await.unwrap();

        assert!(matches!(outcome, CallOutcome::Completed(r) if r.correlation_id == req.correlation_id));
        assert_eq!(rpc.pending_count(), 0);
        assert_eq!(bus.messages_with_key("inventory", "grant").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out() {
        let rpc = StepRpc::new(InMemoryMessageBus::new(), Duration::from_millis(100));
        let outcome = rpc.call(&request(), &CancellationToken::new()).await;
        assert_eq!(outcome, CallOutcome::TimedOut);
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_publish_issues_nothing() {
        let bus = InMemoryMessageBus::new();
        let rpc = StepRpc::new(bus.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = rpc.call(&request(), &cancel).await;
        assert_eq!(outcome, CallOutcome::Cancelled { issued: false });
        assert!(bus.messages("inventory").await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_while_waiting_was_issued() {
        let bus = InMemoryMessageBus::new();
        let rpc = StepRpc::new(bus.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            let rpc = rpc.clone();
            tokio::spawn(async move {
                while rpc.pending_count() == 0 {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            })
        };

        let outcome = rpc.call(&request(), &cancel).await;
        canceller.await.unwrap();
        assert_eq!(outcome, CallOutcome::Cancelled { issued: true });
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let bus = InMemoryMessageBus::new();
        bus.set_fail_on_publish("inventory", true).await;
        let rpc = StepRpc::new(bus, Duration::from_secs(5));

        let outcome = rpc.call(&request(), &CancellationToken::new()).await;
        assert!(matches!(outcome, CallOutcome::PublishFailed(_)));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn late_response_finds_no_waiter() {
        let rpc = StepRpc::new(InMemoryMessageBus::new(), Duration::from_secs(5));
        assert!(!rpc.deliver(domain::SagaStepResult::success(&request())));
    }

    #[test]
    fn steps_go_to_their_topic() {
        let debit = StepRequest::new(
            SagaId::new(),
            StepCommand::Debit {
                player_id: PlayerId::new("p1"),
                item_id: ItemId::new("sword"),
                amount: common::Money::from_cents(-1),
            },
        );
        assert_eq!(debit.key().topic(), PLAYER_TOPIC);
    }
}
