//! Durable consumer checkpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::CheckpointError;

type Result<T> = std::result::Result<T, CheckpointError>;

/// The read position of one consumer scope: the next offset to process.
///
/// A missing record is equivalent to offset 0 ("start of topic").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scope: String,
    pub offset: i64,
}

impl Checkpoint {
    /// A checkpoint at the start of the topic.
    pub fn start(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            offset: 0,
        }
    }

    /// Returns the checkpoint moved past the message at `message_offset`.
    ///
    /// Never moves backwards.
    pub fn advanced_past(&self, message_offset: i64) -> Self {
        Self {
            scope: self.scope.clone(),
            offset: self.offset.max(message_offset + 1),
        }
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.scope, self.offset)
    }
}

/// Storage for consumer checkpoints, one record per scope.
///
/// `upsert_offset` has set semantics: the caller computes the next value.
/// It must only be called once the side effect of the corresponding message
/// has been applied.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the last committed offset, or `NotFound` when none exists.
    async fn get_offset(&self, scope: &str) -> Result<i64>;

    /// Creates or replaces the checkpoint of `scope`.
    async fn upsert_offset(&self, scope: &str, offset: i64) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn get_offset(&self, scope: &str) -> Result<i64> {
        (**self).get_offset(scope).await
    }

    async fn upsert_offset(&self, scope: &str, offset: i64) -> Result<()> {
        (**self).upsert_offset(scope, offset).await
    }
}

/// Extension trait providing convenience methods for checkpoint stores.
#[async_trait]
pub trait CheckpointStoreExt: CheckpointStore {
    /// Loads the checkpoint of `scope`, defaulting to the start of the topic.
    async fn load(&self, scope: &str) -> Result<Checkpoint> {
        match self.get_offset(scope).await {
            Ok(offset) => Ok(Checkpoint {
                scope: scope.to_string(),
                offset,
            }),
            Err(CheckpointError::NotFound(_)) => Ok(Checkpoint::start(scope)),
            Err(e) => Err(e),
        }
    }

    /// Persists a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.upsert_offset(&checkpoint.scope, checkpoint.offset)
            .await
    }
}

impl<T: CheckpointStore + ?Sized> CheckpointStoreExt for T {}

/// In-memory checkpoint store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    offsets: Arc<RwLock<HashMap<String, i64>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of successful upserts.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CheckpointError::StoreUnavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_offset(&self, scope: &str) -> Result<i64> {
        self.check_available()?;
        self.offsets
            .read()
            .await
            .get(scope)
            .copied()
            .ok_or_else(|| CheckpointError::NotFound(scope.to_string()))
    }

    async fn upsert_offset(&self, scope: &str, offset: i64) -> Result<()> {
        self.check_available()?;
        self.offsets.write().await.insert(scope.to_string(), offset);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
