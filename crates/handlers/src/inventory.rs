//! Inventory step handler.

use async_trait::async_trait;
use domain::{
    INVENTORY_TOPIC, InventoryRepository, SagaStepResult, StepCommand, StepKey, StepRequest,
};

use crate::step::{StepHandler, StepOutcome};
use crate::{HandlerError, Result};

/// Applies inventory steps from the `inventory` topic.
pub struct InventoryHandler<I> {
    inventory: I,
}

impl<I: InventoryRepository> InventoryHandler<I> {
    pub fn new(inventory: I) -> Self {
        Self { inventory }
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }
}

#[async_trait]
impl<I: InventoryRepository> StepHandler for InventoryHandler<I> {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn topic(&self) -> &'static str {
        INVENTORY_TOPIC
    }

    fn accepts(&self, key: StepKey) -> bool {
        matches!(
            key,
            StepKey::Grant | StepKey::Revoke | StepKey::RollbackGrant | StepKey::RollbackRevoke
        )
    }

    #[tracing::instrument(skip_all, fields(step = %request.key(), correlation_id = %request.correlation_id))]
    async fn apply(&self, request: &StepRequest) -> Result<StepOutcome> {
        let key = request.correlation_id;
        let written = match &request.command {
            StepCommand::Grant { player_id, item_id } => {
                self.inventory.grant(player_id, item_id, key).await
            }
            StepCommand::Revoke { player_id, item_id } => {
                self.inventory.revoke(player_id, item_id, key).await
            }
            StepCommand::RollbackGrant { original, .. } => {
                let removed = self.inventory.rollback_grant(*original).await?;
                return Ok(StepOutcome::Compensated {
                    applied: removed.is_some(),
                });
            }
            StepCommand::RollbackRevoke { original, .. } => {
                let restored = self.inventory.restore(*original).await?;
                return Ok(StepOutcome::Compensated {
                    applied: restored.is_some(),
                });
            }
            other => return Err(HandlerError::UnsupportedStep(other.key())),
        };

        let result = match written {
            Ok(record) => SagaStepResult::success(request).with_inventory_id(record.inventory_id),
            Err(e) => SagaStepResult::failure(request, e.to_string()),
        };
        Ok(StepOutcome::Reply(result))
    }
}
