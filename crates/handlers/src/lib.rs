//! Domain event handlers.
//!
//! Each consuming service runs one [`DomainEventHandler`]: a checkpointed
//! consumer of the service's inbound topic that turns saga step requests into
//! local mutations and answers on the payment topic.
//!
//! - [`LedgerHandler`] applies `debit`, `credit` and `reverse_entry`
//! - [`InventoryHandler`] applies `grant`, `revoke`, `rollback_grant` and
//!   `rollback_revoke`

pub mod error;
pub mod inventory;
pub mod ledger;
pub mod service;
pub mod step;

pub use error::{HandlerError, Result};
pub use inventory::InventoryHandler;
pub use ledger::LedgerHandler;
pub use service::DomainEventHandler;
pub use step::{StepHandler, StepOutcome, StepProcessor};
