//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Ledger or inventory error.
    Domain(DomainError),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::InvalidAmount { .. }
        | DomainError::InsufficientBalance { .. }
        | DomainError::NotOwned { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        DomainError::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::ItemNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::InvalidRequest(_)
        | SagaError::StepRejected { .. }
        | SagaError::StepTimeout { .. }
        | SagaError::PublishFailed { .. } => (StatusCode::BAD_REQUEST, err.reason()),
        SagaError::Catalog(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        SagaError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{ItemId, PlayerId};
    use domain::StepKey;

    use super::*;

    #[test]
    fn saga_errors_map_to_status_codes() {
        let cases = [
            (SagaError::ItemNotFound(ItemId::new("bow")), StatusCode::NOT_FOUND),
            (
                SagaError::StepRejected {
                    step: StepKey::Revoke,
                    reason: "not owned".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (SagaError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (SagaError::Catalog("down".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::Saga(err).into_response().status(), status);
        }
    }

    #[test]
    fn rejected_step_body_is_the_handler_reason() {
        let (status, message) = saga_error_to_response(SagaError::StepRejected {
            step: StepKey::Debit,
            reason: "player balance is not enough".into(),
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "player balance is not enough");
    }

    #[test]
    fn domain_errors_map_to_status_codes() {
        let err = DomainError::NotOwned {
            player_id: PlayerId::new("p1"),
            item_id: ItemId::new("sword"),
        };
        assert_eq!(
            ApiError::Domain(err).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Domain(DomainError::StorageUnavailable("off".into()))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
