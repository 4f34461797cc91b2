//! Handler error types.

use domain::{DomainError, StepKey};
use thiserror::Error;

/// Errors that can occur while running a domain event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The consumer could not be started or the bus failed.
    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::BusError),

    /// A compensating mutation failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The handler was given a step it does not own.
    #[error("Step '{0}' is not handled here")]
    UnsupportedStep(StepKey),
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;
