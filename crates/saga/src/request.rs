//! Saga request and receipt types.

use std::collections::HashMap;

use common::{ItemId, Money, SagaId};
use domain::{CatalogItem, SagaStepResult};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::state::SagaState;

fn one() -> u32 {
    1
}

/// One requested item and how many units of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: ItemId,
    #[serde(default = "one")]
    pub quantity: u32,
}

impl LineItem {
    pub fn new(item_id: impl Into<ItemId>) -> Self {
        Self {
            item_id: item_id.into(),
            quantity: 1,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

/// A buy or sell request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemServiceReq {
    pub items: Vec<LineItem>,
}

impl ItemServiceReq {
    pub fn new(items: impl IntoIterator<Item = LineItem>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Expands line items into one entry per unit, in request order.
    ///
    /// The summed quantity must not exceed `max_units`; it is checked before
    /// anything is allocated.
    pub fn units(&self, max_units: usize) -> Result<Vec<ItemId>> {
        if self.items.is_empty() {
            return Err(SagaError::InvalidRequest("no items requested".to_string()));
        }
        if let Some(line) = self.items.iter().find(|line| line.quantity == 0) {
            return Err(SagaError::InvalidRequest(format!(
                "quantity of {} must be at least 1",
                line.item_id
            )));
        }

        let total: u64 = self.items.iter().map(|line| u64::from(line.quantity)).sum();
        if total > max_units as u64 {
            return Err(SagaError::InvalidRequest(format!(
                "{total} units requested, at most {max_units} allowed"
            )));
        }

        let mut units = Vec::with_capacity(total as usize);
        for line in &self.items {
            units.extend(std::iter::repeat_n(line.item_id.clone(), line.quantity as usize));
        }
        Ok(units)
    }
}

/// An authoritative unit price, resolved once per saga invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPriceQuote {
    pub item_id: ItemId,
    pub unit_price: Money,
}

/// Prices `units` from the catalog response.
///
/// Fails with `ItemNotFound` for the first unit whose id is missing.
pub fn quote_units(units: &[ItemId], catalog: Vec<CatalogItem>) -> Result<Vec<ItemPriceQuote>> {
    let prices: HashMap<ItemId, Money> = catalog
        .into_iter()
        .map(|item| (item.item_id, item.unit_price))
        .collect();

    units
        .iter()
        .map(|id| {
            prices
                .get(id)
                .map(|&unit_price| ItemPriceQuote {
                    item_id: id.clone(),
                    unit_price,
                })
                .ok_or_else(|| SagaError::ItemNotFound(id.clone()))
        })
        .collect()
}

/// The outcome of a committed saga: one result per unit of the last stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaReceipt {
    pub saga_id: SagaId,
    pub state: SagaState,
    pub results: Vec<SagaStepResult>,
}
