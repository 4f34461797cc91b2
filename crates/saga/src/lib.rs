//! Saga coordinator for buying and selling catalog items.
//!
//! A buy debits the player's ledger for every unit and then grants the units
//! to the player's inventory. A sell revokes the units and then credits a
//! payout for each. Steps are request/response exchanges over the message
//! bus, matched by a per-step correlation id.
//!
//! If any step of a stage fails, every step that succeeded (or whose outcome
//! is unknown after a timeout) gets a compensating request before the saga
//! returns the first failure.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod request;
pub mod router;
pub mod rpc;
pub mod services;
pub mod state;

pub use config::{MAX_UNITS_PER_REQUEST, SagaConfig};
pub use coordinator::{SAGA_BUY, SAGA_SELL, SagaCoordinator};
pub use error::{Result, SagaError};
pub use request::{ItemPriceQuote, ItemServiceReq, LineItem, SagaReceipt};
pub use router::{RESPONSE_SCOPE, ResponseRouter};
pub use rpc::{CallOutcome, StepRpc};
pub use services::{CatalogLookup, InMemoryCatalog};
pub use state::SagaState;
