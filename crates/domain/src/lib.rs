//! Domain layer for the marketplace services.
//!
//! This crate provides:
//! - The player ledger: immutable signed entries, balance derived by summing
//! - Per-unit inventory ownership records
//! - The catalog item shape returned by the catalog lookup
//! - The saga step wire protocol shared by the coordinator and the handlers
//!
//! Every mutation carries the correlation id of the saga step that caused it
//! and the repositories treat that id as a natural uniqueness key, so
//! replaying a step never applies it twice.

pub mod catalog;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod messages;

pub use catalog::CatalogItem;
pub use error::{DomainError, Result};
pub use inventory::{InMemoryInventory, InventoryRecord, InventoryRepository};
pub use ledger::{InMemoryLedger, LedgerEntry, LedgerRepository};
pub use messages::{
    INVENTORY_TOPIC, PAYMENT_TOPIC, PLAYER_TOPIC, SagaStepResult, StepCommand, StepKey,
    StepRequest,
};
