//! Player ledger.
//!
//! Entries are immutable. A player's balance is never stored; it is the sum
//! of the player's entries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, LedgerRef, Money, PlayerId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};

/// One signed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ledger_ref: LedgerRef,
    pub player_id: PlayerId,
    pub amount: Money,
    /// The step (or request) that wrote the entry. Unique across the ledger.
    pub idempotency_key: CorrelationId,
    /// Set on reversal entries: the key of the entry being reversed.
    pub reverses: Option<CorrelationId>,
    pub created_at: DateTime<Utc>,
}

/// Storage for ledger entries.
///
/// Every write is keyed by a [`CorrelationId`]. Writing again with a key that
/// is already present returns the stored entry instead of appending.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Appends a positive entry.
    async fn credit(&self, player_id: &PlayerId, amount: Money, key: CorrelationId)
    -> Result<LedgerEntry>;

    /// Appends a negative entry if the player's balance covers it.
    ///
    /// The balance is checked under the same lock as the append, so
    /// concurrent debits can never overdraw.
    async fn debit(&self, player_id: &PlayerId, amount: Money, key: CorrelationId)
    -> Result<LedgerEntry>;

    /// Appends the opposite of the entry written under `original`.
    ///
    /// Returns `None` when no such entry exists. An entry is reversed at most
    /// once; later calls return the existing reversal.
    async fn reverse(
        &self,
        original: CorrelationId,
        key: CorrelationId,
    ) -> Result<Option<LedgerEntry>>;

    /// Sum of the player's entries.
    async fn balance(&self, player_id: &PlayerId) -> Result<Money>;

    /// The player's entries, oldest first.
    async fn entries(&self, player_id: &PlayerId) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
impl<T: LedgerRepository + ?Sized> LedgerRepository for Arc<T> {
    async fn credit(
        &self,
        player_id: &PlayerId,
        amount: Money,
        key: CorrelationId,
    ) -> Result<LedgerEntry> {
        (**self).credit(player_id, amount, key).await
    }

    async fn debit(
        &self,
        player_id: &PlayerId,
        amount: Money,
        key: CorrelationId,
    ) -> Result<LedgerEntry> {
        (**self).debit(player_id, amount, key).await
    }

    async fn reverse(
        &self,
        original: CorrelationId,
        key: CorrelationId,
    ) -> Result<Option<LedgerEntry>> {
        (**self).reverse(original, key).await
    }

    async fn balance(&self, player_id: &PlayerId) -> Result<Money> {
        (**self).balance(player_id).await
    }

    async fn entries(&self, player_id: &PlayerId) -> Result<Vec<LedgerEntry>> {
        (**self).entries(player_id).await
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    by_key: HashMap<CorrelationId, usize>,
    reversal_of: HashMap<CorrelationId, usize>,
    unavailable: bool,
}

impl LedgerState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(DomainError::StorageUnavailable(
                "ledger store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn existing(&self, key: &CorrelationId) -> Option<LedgerEntry> {
        self.by_key.get(key).map(|&i| self.entries[i].clone())
    }

    fn balance(&self, player_id: &PlayerId) -> Result<Money> {
        let amounts = self
            .entries
            .iter()
            .filter(|e| &e.player_id == player_id)
            .map(|e| e.amount);
        Money::checked_sum(amounts).ok_or(DomainError::InvalidAmount {
            amount: Money::from_cents(i64::MAX),
            reason: "balance exceeds the representable range",
        })
    }

    /// Fails when appending `amount` would take the balance out of range.
    fn ensure_fits(&self, player_id: &PlayerId, amount: Money) -> Result<()> {
        match self.balance(player_id)?.checked_add(amount) {
            Some(_) => Ok(()),
            None => Err(DomainError::InvalidAmount {
                amount,
                reason: "balance would overflow",
            }),
        }
    }

    fn push(
        &mut self,
        player_id: &PlayerId,
        amount: Money,
        key: CorrelationId,
        reverses: Option<CorrelationId>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            ledger_ref: LedgerRef::new(),
            player_id: player_id.clone(),
            amount,
            idempotency_key: key,
            reverses,
            created_at: Utc::now(),
        };
        let index = self.entries.len();
        self.by_key.insert(key, index);
        if let Some(original) = reverses {
            self.reversal_of.insert(original, index);
        }
        self.entries.push(entry.clone());
        entry
    }
}

/// In-memory ledger for testing and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `StorageUnavailable` while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Total number of entries across all players.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    #[tracing::instrument(skip(self))]
    async fn credit(
        &self,
        player_id: &PlayerId,
        amount: Money,
        key: CorrelationId,
    ) -> Result<LedgerEntry> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if let Some(entry) = state.existing(&key) {
            tracing::debug!(%key, "credit already applied");
            return Ok(entry);
        }
        if !amount.is_positive() {
            return Err(DomainError::InvalidAmount {
                amount,
                reason: "credit must be positive",
            });
        }
        state.ensure_fits(player_id, amount)?;

        Ok(state.push(player_id, amount, key, None))
    }

    #[tracing::instrument(skip(self))]
    async fn debit(
        &self,
        player_id: &PlayerId,
        amount: Money,
        key: CorrelationId,
    ) -> Result<LedgerEntry> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if let Some(entry) = state.existing(&key) {
            tracing::debug!(%key, "debit already applied");
            return Ok(entry);
        }
        let required = match amount.checked_neg() {
            Some(required) if amount.is_negative() => required,
            _ => {
                return Err(DomainError::InvalidAmount {
                    amount,
                    reason: "debit must be negative",
                });
            }
        };

        let balance = state.balance(player_id)?;
        if balance < required {
            return Err(DomainError::InsufficientBalance {
                player_id: player_id.clone(),
                balance,
                required,
            });
        }

        Ok(state.push(player_id, amount, key, None))
    }

    #[tracing::instrument(skip(self))]
    async fn reverse(
        &self,
        original: CorrelationId,
        key: CorrelationId,
    ) -> Result<Option<LedgerEntry>> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if let Some(&index) = state.reversal_of.get(&original) {
            return Ok(Some(state.entries[index].clone()));
        }
        let Some(entry) = state.existing(&original) else {
            tracing::debug!(%original, "nothing to reverse");
            return Ok(None);
        };
        if state.by_key.contains_key(&key) {
            // The key was already used for a different write.
            return Ok(state.existing(&key));
        }
        let Some(amount) = entry.amount.checked_neg() else {
            return Err(DomainError::InvalidAmount {
                amount: entry.amount,
                reason: "entry cannot be negated",
            });
        };
        state.ensure_fits(&entry.player_id, amount)?;

        Ok(Some(state.push(
            &entry.player_id,
            amount,
            key,
            Some(original),
        )))
    }

    async fn balance(&self, player_id: &PlayerId) -> Result<Money> {
        let state = self.state.read().await;
        state.check_available()?;
        state.balance(player_id)
    }

    async fn entries(&self, player_id: &PlayerId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| &e.player_id == player_id)
            .cloned()
            .collect())
    }
}
