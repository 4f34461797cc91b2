use common::{ItemId, Money};
use serde::{Deserialize, Serialize};

/// An entry of the item catalog.
///
/// `unit_price` is authoritative: sagas always price line items from here,
/// never from the client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub title: String,
    pub unit_price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<i32>,
}

impl CatalogItem {
    /// Creates a catalog item without optional metadata.
    pub fn new(item_id: impl Into<ItemId>, title: impl Into<String>, unit_price: Money) -> Self {
        Self {
            item_id: item_id.into(),
            title: title.into(),
            unit_price,
            image_url: None,
            damage: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_damage(mut self, damage: i32) -> Self {
        self.damage = Some(damage);
        self
    }
}
