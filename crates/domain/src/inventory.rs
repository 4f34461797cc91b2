//! Per-unit inventory ownership.
//!
//! A player owns one [`InventoryRecord`] per item instance. Grants and
//! revokes are keyed by the correlation id of the step that caused them, and
//! their rollbacks are keyed by that same id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, InventoryId, ItemId, PlayerId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};

/// Ownership of one item instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub inventory_id: InventoryId,
    pub player_id: PlayerId,
    pub item_id: ItemId,
    pub granted_by: CorrelationId,
    pub acquired_at: DateTime<Utc>,
}

/// Storage for inventory records.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// Creates a record for the player.
    ///
    /// A key that was already granted returns the original record, even if
    /// that record has since been removed.
    async fn grant(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord>;

    /// Removes one record of `item_id` from the player.
    ///
    /// Fails with `NotOwned` when the player holds none. A key that was
    /// already applied returns the record it removed.
    async fn revoke(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord>;

    /// Deletes the record created by the grant `original`.
    ///
    /// Returns `None` when that grant never happened or its record is gone.
    async fn rollback_grant(&self, original: CorrelationId) -> Result<Option<InventoryRecord>>;

    /// Re-inserts the record removed by the revoke `original`, keeping its
    /// inventory id. Returns `None` when there is nothing to restore.
    async fn restore(&self, original: CorrelationId) -> Result<Option<InventoryRecord>>;

    /// Records currently owned by the player, oldest first.
    async fn find_player_items(&self, player_id: &PlayerId) -> Result<Vec<InventoryRecord>>;
}

#[async_trait]
impl<T: InventoryRepository + ?Sized> InventoryRepository for Arc<T> {
    async fn grant(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord> {
        (**self).grant(player_id, item_id, key).await
    }

    async fn revoke(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord> {
        (**self).revoke(player_id, item_id, key).await
    }

    async fn rollback_grant(&self, original: CorrelationId) -> Result<Option<InventoryRecord>> {
        (**self).rollback_grant(original).await
    }

    async fn restore(&self, original: CorrelationId) -> Result<Option<InventoryRecord>> {
        (**self).restore(original).await
    }

    async fn find_player_items(&self, player_id: &PlayerId) -> Result<Vec<InventoryRecord>> {
        (**self).find_player_items(player_id).await
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    owned: Vec<InventoryRecord>,
    grants: HashMap<CorrelationId, InventoryRecord>,
    revocations: HashMap<CorrelationId, InventoryRecord>,
    restored: HashSet<CorrelationId>,
    fail_on_grant: bool,
    fail_on_revoke: bool,
}

impl InventoryState {
    fn position(&self, inventory_id: InventoryId) -> Option<usize> {
        self.owned
            .iter()
            .position(|r| r.inventory_id == inventory_id)
    }
}

/// In-memory inventory for testing and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    state: Arc<RwLock<InventoryState>>,
}

impl InMemoryInventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures grants to fail while set.
    pub async fn set_fail_on_grant(&self, fail: bool) {
        self.state.write().await.fail_on_grant = fail;
    }

    /// Configures revokes to fail while set.
    pub async fn set_fail_on_revoke(&self, fail: bool) {
        self.state.write().await.fail_on_revoke = fail;
    }

    /// Number of records currently owned by anyone.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.owned.len()
    }

    /// Number of records of `item_id` the player owns.
    pub async fn count_owned(&self, player_id: &PlayerId, item_id: &ItemId) -> usize {
        self.state
            .read()
            .await
            .owned
            .iter()
            .filter(|r| &r.player_id == player_id && &r.item_id == item_id)
            .count()
    }
}

#[async_trait]
impl InventoryRepository for InMemoryInventory {
    #[tracing::instrument(skip(self))]
    async fn grant(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord> {
        let mut state = self.state.write().await;

        if let Some(record) = state.grants.get(&key) {
            tracing::debug!(%key, "grant already applied");
            return Ok(record.clone());
        }
        if state.fail_on_grant {
            return Err(DomainError::StorageUnavailable(format!(
                "inventory rejected grant of {item_id}"
            )));
        }

        let record = InventoryRecord {
            inventory_id: InventoryId::new(),
            player_id: player_id.clone(),
            item_id: item_id.clone(),
            granted_by: key,
            acquired_at: Utc::now(),
        };
        state.grants.insert(key, record.clone());
        state.owned.push(record.clone());
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn revoke(
        &self,
        player_id: &PlayerId,
        item_id: &ItemId,
        key: CorrelationId,
    ) -> Result<InventoryRecord> {
        let mut state = self.state.write().await;

        if let Some(record) = state.revocations.get(&key) {
            tracing::debug!(%key, "revoke already applied");
            return Ok(record.clone());
        }
        if state.fail_on_revoke {
            return Err(DomainError::StorageUnavailable(format!(
                "inventory rejected revoke of {item_id}"
            )));
        }

        let Some(index) = state
            .owned
            .iter()
            .position(|r| &r.player_id == player_id && &r.item_id == item_id)
        else {
            return Err(DomainError::NotOwned {
                player_id: player_id.clone(),
                item_id: item_id.clone(),
            });
        };

        let record = state.owned.remove(index);
        state.revocations.insert(key, record.clone());
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn rollback_grant(&self, original: CorrelationId) -> Result<Option<InventoryRecord>> {
        let mut state = self.state.write().await;

        let Some(inventory_id) = state.grants.get(&original).map(|r| r.inventory_id) else {
            return Ok(None);
        };
        Ok(state
            .position(inventory_id)
            .map(|index| state.owned.remove(index)))
    }

    #[tracing::instrument(skip(self))]
    async fn restore(&self, original: CorrelationId) -> Result<Option<InventoryRecord>> {
        let mut state = self.state.write().await;

        let Some(record) = state.revocations.get(&original).cloned() else {
            return Ok(None);
        };
        if state.restored.contains(&original) || state.position(record.inventory_id).is_some() {
            return Ok(None);
        }

        state.restored.insert(original);
        state.owned.push(record.clone());
        Ok(Some(record))
    }

    async fn find_player_items(&self, player_id: &PlayerId) -> Result<Vec<InventoryRecord>> {
        Ok(self
            .state
            .read()
            .await
            .owned
            .iter()
            .filter(|r| &r.player_id == player_id)
            .cloned()
            .collect())
    }
}
