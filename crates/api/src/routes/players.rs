//! Player balance, deposit and inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CorrelationId, InventoryId, ItemId, LedgerRef, Money, PlayerId};
use domain::{InventoryRepository, LedgerRepository};
use message_bus::MessageBus;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct BalanceResponse {
    pub player_id: PlayerId,
    pub balance_cents: i64,
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub player_id: PlayerId,
    pub ledger_ref: LedgerRef,
    pub balance_cents: i64,
}

#[derive(Serialize)]
pub struct OwnedItemResponse {
    pub inventory_id: InventoryId,
    pub item_id: ItemId,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub damage: Option<i32>,
    pub acquired_at: DateTime<Utc>,
}

// -- Handlers --

/// POST /players/{id}/deposit: credit the player's ledger directly.
#[tracing::instrument(skip(state, req))]
pub async fn deposit<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<DepositResponse>), ApiError> {
    if req.amount_cents <= 0 {
        return Err(ApiError::BadRequest(format!(
            "deposit must be positive, got {} cents",
            req.amount_cents
        )));
    }

    let player_id = PlayerId::new(id);
    let entry = state
        .ledger
        .credit(
            &player_id,
            Money::from_cents(req.amount_cents),
            CorrelationId::new(),
        )
        .await?;
    let balance = state.ledger.balance(&player_id).await?;
    metrics::counter!("ledger_deposits_total").increment(1);

    Ok((
        StatusCode::CREATED,
        Json(DepositResponse {
            player_id,
            ledger_ref: entry.ledger_ref,
            balance_cents: balance.cents(),
        }),
    ))
}

/// GET /players/{id}/balance: sum of the player's ledger entries.
#[tracing::instrument(skip(state))]
pub async fn balance<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let player_id = PlayerId::new(id);
    let balance = state.ledger.balance(&player_id).await?;
    Ok(Json(BalanceResponse {
        player_id,
        balance_cents: balance.cents(),
    }))
}

/// GET /players/{id}/inventory: owned units joined with catalog details.
///
/// Units whose item has left the catalog are still listed, without details.
#[tracing::instrument(skip(state))]
pub async fn inventory<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OwnedItemResponse>>, ApiError> {
    let player_id = PlayerId::new(id);
    let records = state.inventory.find_player_items(&player_id).await?;

    let mut owned = Vec::with_capacity(records.len());
    for record in records {
        let item = state.catalog.get(&record.item_id).await;
        owned.push(OwnedItemResponse {
            inventory_id: record.inventory_id,
            title: item.as_ref().map(|i| i.title.clone()),
            image_url: item.as_ref().and_then(|i| i.image_url.clone()),
            damage: item.as_ref().and_then(|i| i.damage),
            item_id: record.item_id,
            acquired_at: record.acquired_at,
        });
    }
    Ok(Json(owned))
}
