//! Saga error types.

use common::{CorrelationId, ItemId};
use domain::StepKey;
use thiserror::Error;

/// Terminal failures of a saga invocation.
///
/// Input errors (`ItemNotFound`, `InvalidRequest`, `Catalog`) happen before
/// any step is published. Step errors are returned only after compensation
/// for every issued step has been published.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A referenced item is not in the catalog.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The catalog lookup itself failed.
    #[error("Catalog lookup failed: {0}")]
    Catalog(String),

    /// No response arrived within the step timeout.
    #[error("Step '{step}' timed out (correlation id {correlation_id})")]
    StepTimeout {
        step: StepKey,
        correlation_id: CorrelationId,
    },

    /// The handler answered with an error.
    #[error("Step '{step}' rejected: {reason}")]
    StepRejected { step: StepKey, reason: String },

    /// The step request could not be produced.
    #[error("Publish failed for step '{step}': {reason}")]
    PublishFailed { step: StepKey, reason: String },

    /// The caller cancelled the saga.
    #[error("Saga cancelled")]
    Cancelled,
}

impl SagaError {
    /// The message shown to the client.
    ///
    /// Rejected steps surface the handler's own reason.
    pub fn reason(&self) -> String {
        match self {
            SagaError::StepRejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
