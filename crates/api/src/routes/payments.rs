//! Buy and sell endpoints driving the saga coordinator.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::PlayerId;
use message_bus::MessageBus;
use saga::{ItemServiceReq, SAGA_BUY, SAGA_SELL, SagaReceipt};

use crate::AppState;
use crate::error::ApiError;

/// POST /players/{id}/buy: debit the player and grant the requested items.
#[tracing::instrument(skip(state, req))]
pub async fn buy<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    Json(req): Json<ItemServiceReq>,
) -> Result<Json<SagaReceipt>, ApiError> {
    run_saga(state, SAGA_BUY, PlayerId::new(id), req).await
}

/// POST /players/{id}/sell: revoke the items and credit the payout.
#[tracing::instrument(skip(state, req))]
pub async fn sell<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    Json(req): Json<ItemServiceReq>,
) -> Result<Json<SagaReceipt>, ApiError> {
    run_saga(state, SAGA_SELL, PlayerId::new(id), req).await
}

/// Runs the saga on its own task.
///
/// A client that disconnects drops the handler future; the spawned saga
/// still finishes and compensates. Only process shutdown cancels it.
async fn run_saga<B: MessageBus + Clone + 'static>(
    state: Arc<AppState<B>>,
    saga: &'static str,
    player_id: PlayerId,
    req: ItemServiceReq,
) -> Result<Json<SagaReceipt>, ApiError> {
    let coordinator = state.coordinator.clone();
    let cancel = state.shutdown.child_token();

    let task = tokio::spawn(async move {
        if saga == SAGA_SELL {
            coordinator.sell_item(&player_id, &req, &cancel).await
        } else {
            coordinator.buy_item(&player_id, &req, &cancel).await
        }
    });

    let receipt = task
        .await
        .map_err(|e| ApiError::Internal(format!("{saga} saga task failed: {e}")))??;
    Ok(Json(receipt))
}
