//! Catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::Money;
use domain::CatalogItem;
use message_bus::MessageBus;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RegisterItemRequest {
    pub item_id: String,
    pub title: String,
    pub unit_price_cents: i64,
    pub image_url: Option<String>,
    pub damage: Option<i32>,
}

#[derive(Serialize)]
pub struct ItemResponse {
    pub item_id: String,
    pub title: String,
    pub unit_price_cents: i64,
    pub image_url: Option<String>,
    pub damage: Option<i32>,
}

impl From<CatalogItem> for ItemResponse {
    fn from(item: CatalogItem) -> Self {
        Self {
            item_id: item.item_id.to_string(),
            title: item.title,
            unit_price_cents: item.unit_price.cents(),
            image_url: item.image_url,
            damage: item.damage,
        }
    }
}

/// POST /items: add or replace a catalog item.
#[tracing::instrument(skip(state, req))]
pub async fn register<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<RegisterItemRequest>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    if req.item_id.trim().is_empty() {
        return Err(ApiError::BadRequest("item_id must not be empty".into()));
    }
    if req.unit_price_cents <= 0 {
        return Err(ApiError::BadRequest(format!(
            "unit price must be positive, got {} cents",
            req.unit_price_cents
        )));
    }

    let mut item = CatalogItem::new(
        req.item_id,
        req.title,
        Money::from_cents(req.unit_price_cents),
    );
    if let Some(url) = req.image_url {
        item = item.with_image_url(url);
    }
    if let Some(damage) = req.damage {
        item = item.with_damage(damage);
    }

    state.catalog.insert(item.clone()).await;
    Ok((StatusCode::CREATED, Json(item.into())))
}

/// GET /items: the catalog, ordered by item id.
pub async fn list<B: MessageBus + Clone + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Json<Vec<ItemResponse>> {
    let items = state.catalog.list().await;
    Json(items.into_iter().map(ItemResponse::from).collect())
}
