//! Saga step wire protocol.
//!
//! Requests travel on the topic owned by the service that applies them
//! ([`PLAYER_TOPIC`] for the ledger, [`INVENTORY_TOPIC`] for inventory), keyed
//! by the step name. Every handler replies on [`PAYMENT_TOPIC`] with a
//! [`SagaStepResult`] echoing the request's correlation id. Compensating steps
//! carry the correlation id of the step they undo and get no reply.

use common::{CorrelationId, InventoryId, ItemId, LedgerRef, Money, PlayerId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Ledger step requests.
pub const PLAYER_TOPIC: &str = "player";
/// Inventory step requests.
pub const INVENTORY_TOPIC: &str = "inventory";
/// Step responses consumed by the saga coordinator.
pub const PAYMENT_TOPIC: &str = "payment";

/// The name of a saga step, used as the message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    Debit,
    Credit,
    ReverseEntry,
    Grant,
    Revoke,
    RollbackGrant,
    RollbackRevoke,
}

impl StepKey {
    pub const ALL: [StepKey; 7] = [
        StepKey::Debit,
        StepKey::Credit,
        StepKey::ReverseEntry,
        StepKey::Grant,
        StepKey::Revoke,
        StepKey::RollbackGrant,
        StepKey::RollbackRevoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKey::Debit => "debit",
            StepKey::Credit => "credit",
            StepKey::ReverseEntry => "reverse_entry",
            StepKey::Grant => "grant",
            StepKey::Revoke => "revoke",
            StepKey::RollbackGrant => "rollback_grant",
            StepKey::RollbackRevoke => "rollback_revoke",
        }
    }

    /// Parses a message key. Unknown keys yield `None`.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// The topic requests for this step are published to.
    pub fn topic(&self) -> &'static str {
        match self {
            StepKey::Debit | StepKey::Credit | StepKey::ReverseEntry => PLAYER_TOPIC,
            StepKey::Grant
            | StepKey::Revoke
            | StepKey::RollbackGrant
            | StepKey::RollbackRevoke => INVENTORY_TOPIC,
        }
    }

    /// Compensations undo an earlier step and are not answered.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            StepKey::ReverseEntry | StepKey::RollbackGrant | StepKey::RollbackRevoke
        )
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body of a step request, tagged by step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StepCommand {
    /// Append a negative entry; `amount` is `-unit_price`.
    Debit {
        player_id: PlayerId,
        item_id: ItemId,
        amount: Money,
    },
    /// Append a positive entry.
    Credit {
        player_id: PlayerId,
        item_id: ItemId,
        amount: Money,
    },
    /// Reverse the entry written by the step `original`.
    ReverseEntry {
        player_id: PlayerId,
        item_id: ItemId,
        original: CorrelationId,
    },
    Grant {
        player_id: PlayerId,
        item_id: ItemId,
    },
    Revoke {
        player_id: PlayerId,
        item_id: ItemId,
    },
    /// Delete the record created by the grant step `original`.
    RollbackGrant {
        player_id: PlayerId,
        item_id: ItemId,
        original: CorrelationId,
    },
    /// Re-insert the record removed by the revoke step `original`.
    RollbackRevoke {
        player_id: PlayerId,
        item_id: ItemId,
        original: CorrelationId,
    },
}

impl StepCommand {
    pub fn key(&self) -> StepKey {
        match self {
            StepCommand::Debit { .. } => StepKey::Debit,
            StepCommand::Credit { .. } => StepKey::Credit,
            StepCommand::ReverseEntry { .. } => StepKey::ReverseEntry,
            StepCommand::Grant { .. } => StepKey::Grant,
            StepCommand::Revoke { .. } => StepKey::Revoke,
            StepCommand::RollbackGrant { .. } => StepKey::RollbackGrant,
            StepCommand::RollbackRevoke { .. } => StepKey::RollbackRevoke,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        match self {
            StepCommand::Debit { player_id, .. }
            | StepCommand::Credit { player_id, .. }
            | StepCommand::ReverseEntry { player_id, .. }
            | StepCommand::Grant { player_id, .. }
            | StepCommand::Revoke { player_id, .. }
            | StepCommand::RollbackGrant { player_id, .. }
            | StepCommand::RollbackRevoke { player_id, .. } => player_id,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            StepCommand::Debit { item_id, .. }
            | StepCommand::Credit { item_id, .. }
            | StepCommand::ReverseEntry { item_id, .. }
            | StepCommand::Grant { item_id, .. }
            | StepCommand::Revoke { item_id, .. }
            | StepCommand::RollbackGrant { item_id, .. }
            | StepCommand::RollbackRevoke { item_id, .. } => item_id,
        }
    }
}

/// A step request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    /// Unique per step invocation; the response echoes it.
    pub correlation_id: CorrelationId,
    pub saga_id: SagaId,
    pub command: StepCommand,
}

impl StepRequest {
    /// Creates a request with a fresh correlation id.
    pub fn new(saga_id: SagaId, command: StepCommand) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            saga_id,
            command,
        }
    }

    pub fn key(&self) -> StepKey {
        self.command.key()
    }

    /// Decodes a request received under message key `key`.
    ///
    /// The key must name the same step as the payload tag.
    pub fn decode(key: &str, payload: &[u8]) -> Result<Self> {
        let request: StepRequest = serde_json::from_slice(payload)?;
        if request.key().as_str() != key {
            return Err(DomainError::KeyMismatch {
                key: key.to_string(),
                tag: request.key(),
            });
        }
        Ok(request)
    }
}

/// The outcome of a step, published on [`PAYMENT_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStepResult {
    pub correlation_id: CorrelationId,
    pub saga_id: SagaId,
    pub step: StepKey,
    pub player_id: PlayerId,
    pub item_id: ItemId,
    #[serde(default)]
    pub inventory_id: Option<InventoryId>,
    #[serde(default)]
    pub ledger_ref: Option<LedgerRef>,
    #[serde(default)]
    pub amount: Money,
    /// `None` on success, otherwise the reason the step failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl SagaStepResult {
    /// A successful result for `request` with no references filled in.
    pub fn success(request: &StepRequest) -> Self {
        Self {
            correlation_id: request.correlation_id,
            saga_id: request.saga_id,
            step: request.key(),
            player_id: request.command.player_id().clone(),
            item_id: request.command.item_id().clone(),
            inventory_id: None,
            ledger_ref: None,
            amount: Money::zero(),
            error: None,
        }
    }

    /// A failed result for `request`.
    pub fn failure(request: &StepRequest, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::success(request)
        }
    }

    pub fn with_ledger_entry(mut self, ledger_ref: LedgerRef, amount: Money) -> Self {
        self.ledger_ref = Some(ledger_ref);
        self.amount = amount;
        self
    }

    pub fn with_inventory_id(mut self, inventory_id: InventoryId) -> Self {
        self.inventory_id = Some(inventory_id);
        self
    }

    /// Treats an empty error string the same as no error.
    pub fn is_success(&self) -> bool {
        self.error.as_deref().is_none_or(str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debit() -> StepRequest {
        StepRequest::new(
            SagaId::new(),
            StepCommand::Debit {
                player_id: PlayerId::new("p1"),
                item_id: ItemId::new("sword"),
                amount: Money::from_cents(-100),
            },
        )
    }

    #[test]
    fn key_round_trips_through_parse() {
        for key in StepKey::ALL {
            assert_eq!(StepKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(StepKey::parse("buy"), None);
    }

    #[test]
    fn step_topics() {
        assert_eq!(StepKey::Debit.topic(), PLAYER_TOPIC);
        assert_eq!(StepKey::ReverseEntry.topic(), PLAYER_TOPIC);
        assert_eq!(StepKey::Grant.topic(), INVENTORY_TOPIC);
        assert_eq!(StepKey::RollbackRevoke.topic(), INVENTORY_TOPIC);
        assert!(StepKey::RollbackGrant.is_compensation());
        assert!(!StepKey::Revoke.is_compensation());
    }

    #[test]
    fn command_is_a_tagged_union() {
        let request = debit();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["command"]["type"], "debit");
        assert_eq!(json["command"]["data"]["amount"], -100);
        assert_eq!(json["command"]["data"]["player_id"], "p1");
    }

    #[test]
    fn decode_accepts_matching_key() {
        let request = debit();
        let payload = serde_json::to_vec(&request).unwrap();
        let decoded = StepRequest::decode("debit", &payload).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn decode_rejects_key_mismatch() {
        let payload = serde_json::to_vec(&debit()).unwrap();
        let err = StepRequest::decode("credit", &payload).unwrap_err();
        assert!(matches!(
            err,
            DomainError::KeyMismatch {
                tag: StepKey::Debit,
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = StepRequest::decode("debit", b"not json").unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }

    #[test]
    fn result_success_and_failure() {
        let request = debit();
        let ok = SagaStepResult::success(&request)
            .with_ledger_entry(LedgerRef::new(), Money::from_cents(-100));
        assert!(ok.is_success());
        assert_eq!(ok.step, StepKey::Debit);
        assert_eq!(ok.correlation_id, request.correlation_id);

        let failed = SagaStepResult::failure(&request, "player balance is not enough");
        assert!(!failed.is_success());

        let empty = SagaStepResult {
            error: Some(String::new()),
            ..failed
        };
        assert!(empty.is_success());
    }

    #[test]
    fn result_tolerates_missing_optional_fields() {
        let request = debit();
        let json = serde_json::json!({
            "correlation_id": request.correlation_id,
            "saga_id": request.saga_id,
            "step": "grant",
            "player_id": "p1",
            "item_id": "sword"
        });
        let result: SagaStepResult = serde_json::from_value(json).unwrap();
        assert!(result.is_success());
        assert_eq!(result.amount, Money::zero());
        assert_eq!(result.inventory_id, None);
    }
}
