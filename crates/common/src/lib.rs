//! Shared identifiers and money type used by every marketplace service.

mod money;
mod types;

pub use money::Money;
pub use types::{CorrelationId, InventoryId, ItemId, LedgerRef, PlayerId, SagaId};
