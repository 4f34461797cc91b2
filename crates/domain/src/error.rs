//! Domain error types.

use common::{ItemId, Money, PlayerId};
use thiserror::Error;

use crate::messages::StepKey;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The player cannot cover a debit.
    #[error("player balance is not enough: {player_id} has {balance}, needs {required}")]
    InsufficientBalance {
        player_id: PlayerId,
        balance: Money,
        required: Money,
    },

    /// The amount has the wrong sign for the operation.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Money, reason: &'static str },

    /// The player holds no unit of the item.
    #[error("player {player_id} does not own item {item_id}")]
    NotOwned { player_id: PlayerId, item_id: ItemId },

    /// The backing store refused the write.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A step message whose key disagrees with its payload.
    #[error("message key {key} does not match payload type {tag}")]
    KeyMismatch { key: String, tag: StepKey },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
