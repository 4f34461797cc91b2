//! Saga coordinator for the buy and sell sagas.

use std::future::Future;
use std::time::Instant;

use common::{ItemId, PlayerId, SagaId};
use domain::{StepCommand, StepRequest};
use message_bus::MessageBus;
use tokio_util::sync::CancellationToken;

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::request::{ItemPriceQuote, ItemServiceReq, SagaReceipt, quote_units};
use crate::router::ResponseRouter;
use crate::rpc::{CallOutcome, StepRpc};
use crate::services::CatalogLookup;
use crate::state::SagaState;

/// Saga name: buy items from the catalog.
pub const SAGA_BUY: &str = "buy_item";

/// Saga name: sell owned items back.
pub const SAGA_SELL: &str = "sell_item";

/// One issued (or attempted) step of a stage.
#[derive(Debug)]
struct StepRecord {
    request: StepRequest,
    outcome: CallOutcome,
}

impl StepRecord {
    /// A step is compensated when it succeeded or its fate is unknown.
    fn needs_compensation(&self) -> bool {
        match &self.outcome {
            CallOutcome::Completed(result) => result.is_success(),
            CallOutcome::TimedOut => true,
            CallOutcome::Cancelled { issued } => *issued,
            CallOutcome::PublishFailed(_) => false,
        }
    }

    fn error(&self) -> Option<SagaError> {
        let step = self.request.key();
        match &self.outcome {
            CallOutcome::Completed(result) if result.is_success() => None,
            CallOutcome::Completed(result) => Some(SagaError::StepRejected {
                step,
                reason: result.error.clone().unwrap_or_default(),
            }),
            CallOutcome::TimedOut => Some(SagaError::StepTimeout {
                step,
                correlation_id: self.request.correlation_id,
            }),
            CallOutcome::Cancelled { .. } => Some(SagaError::Cancelled),
            CallOutcome::PublishFailed(reason) => Some(SagaError::PublishFailed {
                step,
                reason: reason.clone(),
            }),
        }
    }

    /// The command undoing this step, keyed by its correlation id.
    fn compensation(&self) -> Option<StepCommand> {
        if !self.needs_compensation() {
            return None;
        }
        let original = self.request.correlation_id;
        let player_id = self.request.command.player_id().clone();
        let item_id = self.request.command.item_id().clone();
        match &self.request.command {
            StepCommand::Debit { .. } | StepCommand::Credit { .. } => {
                Some(StepCommand::ReverseEntry {
                    player_id,
                    item_id,
                    original,
                })
            }
            StepCommand::Grant { .. } => Some(StepCommand::RollbackGrant {
                player_id,
                item_id,
                original,
            }),
            StepCommand::Revoke { .. } => Some(StepCommand::RollbackRevoke {
                player_id,
                item_id,
                original,
            }),
            _ => None,
        }
    }

    fn into_result(self) -> Option<domain::SagaStepResult> {
        match self.outcome {
            CallOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Tracks the state of one saga invocation.
struct SagaRun {
    saga_id: SagaId,
    state: SagaState,
}

impl SagaRun {
    fn new(saga_id: SagaId) -> Self {
        Self {
            saga_id,
            state: SagaState::Init,
        }
    }

    fn advance(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid saga transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(saga_id = %self.saga_id, from = %self.state, to = %next, "saga state");
        self.state = next;
    }
}

/// Orchestrates the buy and sell sagas.
///
/// Each saga runs two stages. Every unit of a stage is a step request
/// answered by a domain event handler; all answers of a stage are collected
/// before deciding. When a stage fails, every step that succeeded or timed
/// out so far gets a compensating request and the first failure is returned.
/// The coordinator never touches ledger or inventory storage directly.
pub struct SagaCoordinator<B, C> {
    rpc: StepRpc<B>,
    catalog: C,
    config: SagaConfig,
}

impl<B, C> SagaCoordinator<B, C>
where
    B: MessageBus,
    C: CatalogLookup,
{
    /// Creates a new saga coordinator.
    pub fn new(bus: B, catalog: C, config: SagaConfig) -> Self {
        Self {
            rpc: StepRpc::new(bus, config.step_timeout),
            catalog,
            config,
        }
    }

    /// The processor that must consume the payment topic for calls to
    /// complete.
    pub fn response_router(&self) -> ResponseRouter<B> {
        ResponseRouter::new(self.rpc.clone())
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Debits the player for every unit, then grants the units.
    pub async fn buy_item(
        &self,
        player_id: &PlayerId,
        request: &ItemServiceReq,
        cancel: &CancellationToken,
    ) -> Result<SagaReceipt> {
        let saga_id = SagaId::new();
        self.observe(SAGA_BUY, self.run_buy(saga_id, player_id, request, cancel))
            .await
    }

    /// Revokes every unit, then credits the payout for each.
    pub async fn sell_item(
        &self,
        player_id: &PlayerId,
        request: &ItemServiceReq,
        cancel: &CancellationToken,
    ) -> Result<SagaReceipt> {
        let saga_id = SagaId::new();
        self.observe(SAGA_SELL, self.run_sell(saga_id, player_id, request, cancel))
            .await
    }

    #[tracing::instrument(skip_all, fields(saga = SAGA_BUY, %saga_id, %player_id))]
    async fn run_buy(
        &self,
        saga_id: SagaId,
        player_id: &PlayerId,
        request: &ItemServiceReq,
        cancel: &CancellationToken,
    ) -> Result<SagaReceipt> {
        let mut run = SagaRun::new(saga_id);
        let quotes = self.resolve_prices(request, cancel).await?;
        run.advance(SagaState::PriceResolved);

        run.advance(SagaState::Debiting);
        let debits = self
            .run_stage(
                saga_id,
                quotes.iter().map(|quote| StepCommand::Debit {
                    player_id: player_id.clone(),
                    item_id: quote.item_id.clone(),
                    amount: -quote.unit_price,
                }),
                cancel,
            )
            .await;
        if let Some(error) = stage_error(&debits, quotes.len(), cancel) {
            run.advance(SagaState::DebitFailed);
            self.compensate(saga_id, &[debits.as_slice()]).await;
            run.advance(SagaState::RolledBack);
            return Err(error);
        }
        run.advance(SagaState::DebitedAll);

        run.advance(SagaState::Granting);
        let grants = self
            .run_stage(
                saga_id,
                quotes.iter().map(|quote| StepCommand::Grant {
                    player_id: player_id.clone(),
                    item_id: quote.item_id.clone(),
                }),
                cancel,
            )
            .await;
        if let Some(error) = stage_error(&grants, quotes.len(), cancel) {
            run.advance(SagaState::GrantFailed);
            self.compensate(saga_id, &[grants.as_slice(), debits.as_slice()])
                .await;
            run.advance(SagaState::RolledBack);
            return Err(error);
        }
        run.advance(SagaState::GrantedAll);
        run.advance(SagaState::Committed);

        Ok(SagaReceipt {
            saga_id,
            state: run.state,
            results: grants.into_iter().filter_map(StepRecord::into_result).collect(),
        })
    }

    #[tracing::instrument(skip_all, fields(saga = SAGA_SELL, %saga_id, %player_id))]
    async fn run_sell(
        &self,
        saga_id: SagaId,
        player_id: &PlayerId,
        request: &ItemServiceReq,
        cancel: &CancellationToken,
    ) -> Result<SagaReceipt> {
        let mut run = SagaRun::new(saga_id);
        let quotes = self.resolve_prices(request, cancel).await?;
        run.advance(SagaState::PriceResolved);

        run.advance(SagaState::Revoking);
        let revokes = self
            .run_stage(
                saga_id,
                quotes.iter().map(|quote| StepCommand::Revoke {
                    player_id: player_id.clone(),
                    item_id: quote.item_id.clone(),
                }),
                cancel,
            )
            .await;
        if let Some(error) = stage_error(&revokes, quotes.len(), cancel) {
            run.advance(SagaState::RevokeFailed);
            self.compensate(saga_id, &[revokes.as_slice()]).await;
            run.advance(SagaState::RolledBack);
            return Err(error);
        }
        run.advance(SagaState::RevokedAll);

        run.advance(SagaState::Crediting);
        let percent = self.config.sell_payout_percent;
        let credits = self
            .run_stage(
                saga_id,
                quotes.iter().map(|quote| StepCommand::Credit {
                    player_id: player_id.clone(),
                    item_id: quote.item_id.clone(),
                    amount: quote.unit_price.percent(percent),
                }),
                cancel,
            )
            .await;
        if let Some(error) = stage_error(&credits, quotes.len(), cancel) {
            run.advance(SagaState::CreditFailed);
            // Revoked units come back too, so nothing of a failed sale sticks.
            self.compensate(saga_id, &[credits.as_slice(), revokes.as_slice()])
                .await;
            run.advance(SagaState::RolledBack);
            return Err(error);
        }
        run.advance(SagaState::CreditedAll);
        run.advance(SagaState::Committed);

        Ok(SagaReceipt {
            saga_id,
            state: run.state,
            results: credits.into_iter().filter_map(StepRecord::into_result).collect(),
        })
    }

    /// Validates the request and prices every unit from the catalog.
    ///
    /// Nothing has been published when this fails.
    async fn resolve_prices(
        &self,
        request: &ItemServiceReq,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemPriceQuote>> {
        let units = request.units(self.config.max_units_per_request)?;

        let mut distinct: Vec<ItemId> = units.clone();
        distinct.sort();
        distinct.dedup();

        let found = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SagaError::Cancelled),
            found = self.catalog.find_items_in_ids(&distinct) => found?,
        };

        quote_units(&units, found)
    }

    /// Issues one step per command, one after another.
    ///
    /// Stops issuing once `cancel` fires.
    async fn run_stage(
        &self,
        saga_id: SagaId,
        commands: impl Iterator<Item = StepCommand>,
        cancel: &CancellationToken,
    ) -> Vec<StepRecord> {
        let mut records = Vec::new();
        for command in commands {
            if cancel.is_cancelled() {
                break;
            }
            let request = StepRequest::new(saga_id, command);
            tracing::info!(
                step = %request.key(),
                correlation_id = %request.correlation_id,
                item_id = %request.command.item_id(),
                "saga step started"
            );
            let outcome = self.rpc.call(&request, cancel).await;
            if !matches!(&outcome, CallOutcome::Completed(r) if r.is_success()) {
                tracing::warn!(
                    step = %request.key(),
                    correlation_id = %request.correlation_id,
                    outcome = ?outcome,
                    "saga step failed"
                );
            }
            records.push(StepRecord { request, outcome });
        }
        records
    }

    /// Publishes compensations for `stages`, latest stage and step first.
    ///
    /// Best effort: a compensation that cannot be published is logged for
    /// manual reconciliation and the rest still go out.
    async fn compensate(&self, saga_id: SagaId, stages: &[&[StepRecord]]) {
        let compensations = stages
            .iter()
            .flat_map(|records| records.iter().rev())
            .filter_map(StepRecord::compensation);

        for command in compensations {
            let request = StepRequest::new(saga_id, command);
            let step = request.key();
            metrics::counter!("saga_compensations_total", "step" => step.as_str()).increment(1);

            match self.rpc.send(&request).await {
                Ok(_) => {
                    tracing::info!(
                        %step,
                        item_id = %request.command.item_id(),
                        correlation_id = %request.correlation_id,
                        "compensation published"
                    );
                }
                Err(e) => {
                    metrics::counter!("saga_compensation_publish_failures_total").increment(1);
                    tracing::error!(
                        %step,
                        %saga_id,
                        request = ?request,
                        error = %e,
                        incident = "manual_reconciliation",
                        "compensation publish failed"
                    );
                }
            }
        }
    }

    async fn observe<F>(&self, saga: &'static str, run: F) -> Result<SagaReceipt>
    where
        F: Future<Output = Result<SagaReceipt>>,
    {
        metrics::counter!("saga_executions_total", "saga" => saga).increment(1);
        let started = Instant::now();

        let result = run.await;

        metrics::histogram!("saga_duration_seconds", "saga" => saga)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(receipt) => {
                metrics::counter!("saga_completed_total", "saga" => saga).increment(1);
                tracing::info!(saga, saga_id = %receipt.saga_id, units = receipt.results.len(), "saga committed");
            }
            Err(e) => {
                metrics::counter!("saga_failed_total", "saga" => saga).increment(1);
                tracing::warn!(saga, error = %e, "saga failed");
            }
        }
        result
    }
}

/// The terminal error of a stage, if it failed.
///
/// A cancelled token wins; otherwise the first failing step in line-item
/// order. A stage cut short by cancellation also counts as cancelled.
fn stage_error(
    records: &[StepRecord],
    expected: usize,
    cancel: &CancellationToken,
) -> Option<SagaError> {
    if cancel.is_cancelled() {
        return Some(SagaError::Cancelled);
    }
    records
        .iter()
        .find_map(StepRecord::error)
        .or_else(|| (records.len() < expected).then_some(SagaError::Cancelled))
}
