//! Player ledger step handler.

use async_trait::async_trait;
use domain::{LedgerRepository, PLAYER_TOPIC, SagaStepResult, StepCommand, StepKey, StepRequest};

use crate::step::{StepHandler, StepOutcome};
use crate::{HandlerError, Result};

/// Applies ledger steps from the `player` topic.
pub struct LedgerHandler<L> {
    ledger: L,
}

impl<L: LedgerRepository> LedgerHandler<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

#[async_trait]
impl<L: LedgerRepository> StepHandler for LedgerHandler<L> {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn topic(&self) -> &'static str {
        PLAYER_TOPIC
    }

    fn accepts(&self, key: StepKey) -> bool {
        matches!(
            key,
            StepKey::Debit | StepKey::Credit | StepKey::ReverseEntry
        )
    }

    #[tracing::instrument(skip_all, fields(step = %request.key(), correlation_id = %request.correlation_id))]
    async fn apply(&self, request: &StepRequest) -> Result<StepOutcome> {
        let key = request.correlation_id;
        let written = match &request.command {
            StepCommand::Debit {
                player_id, amount, ..
            } => self.ledger.debit(player_id, *amount, key).await,
            StepCommand::Credit {
                player_id, amount, ..
            } => self.ledger.credit(player_id, *amount, key).await,
            StepCommand::ReverseEntry { original, .. } => {
                let reversal = self.ledger.reverse(*original, key).await?;
                return Ok(StepOutcome::Compensated {
                    applied: reversal.is_some(),
                });
            }
            other => return Err(HandlerError::UnsupportedStep(other.key())),
        };

        let result = match written {
            Ok(entry) => {
                SagaStepResult::success(request).with_ledger_entry(entry.ledger_ref, entry.amount)
            }
            Err(e) => SagaStepResult::failure(request, e.to_string()),
        };
        Ok(StepOutcome::Reply(result))
    }
}
