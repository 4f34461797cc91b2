//! Catalog lookup trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::ItemId;
use domain::CatalogItem;
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Synchronous lookup of authoritative item prices and metadata.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Returns the known items among `ids`. Unknown ids are simply absent.
    async fn find_items_in_ids(&self, ids: &[ItemId]) -> Result<Vec<CatalogItem>, SagaError>;
}

#[async_trait]
impl<T: CatalogLookup + ?Sized> CatalogLookup for Arc<T> {
    async fn find_items_in_ids(&self, ids: &[ItemId]) -> Result<Vec<CatalogItem>, SagaError> {
        (**self).find_items_in_ids(ids).await
    }
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: Arc<RwLock<HashMap<ItemId, CatalogItem>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding `items`.
    pub async fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.insert(item).await;
        }
        catalog
    }

    /// Adds or replaces an item.
    pub async fn insert(&self, item: CatalogItem) {
        self.items.write().await.insert(item.item_id.clone(), item);
    }

    pub async fn get(&self, id: &ItemId) -> Option<CatalogItem> {
        self.items.read().await.get(id).cloned()
    }

    /// All items, ordered by id.
    pub async fn list(&self) -> Vec<CatalogItem> {
        let mut items: Vec<_> = self.items.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        items
    }

    /// Makes lookups fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn find_items_in_ids(&self, ids: &[ItemId]) -> Result<Vec<CatalogItem>, SagaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SagaError::Catalog("catalog unavailable".to_string()));
        }
        let items = self.items.read().await;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }
}
