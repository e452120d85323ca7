use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Everything a handler can surface to the presentation layer. The
/// user-visible message is always short; full detail stays in the logs.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Not enough bonus days")]
    InsufficientBalance,
    #[error("Payment amount does not match the quote")]
    AmountMismatch,
    #[error("Payment code not found or expired")]
    CodeNotFound,
    #[error("Payment not found, try again in a minute")]
    PaymentNotFound,
    #[error("Remote service unavailable")]
    RemoteUnavailable(String),
    #[error("Payment provider credentials expired, manual re-auth required")]
    CredentialsExhausted,
    #[error("Could not provision the account, please retry")]
    ProvisioningFailed(String),
    #[error("Server error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) | ServiceError::CodeNotFound => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::InvalidRequest(_)
            | ServiceError::InsufficientBalance
            | ServiceError::AmountMismatch
            | ServiceError::PaymentNotFound => StatusCode::BAD_REQUEST,
            ServiceError::RemoteUnavailable(_) | ServiceError::CredentialsExhausted => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::ProvisioningFailed(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match &self {
            ServiceError::RemoteUnavailable(detail) => {
                tracing::error!("Remote service unavailable: {}", detail);
            }
            ServiceError::ProvisioningFailed(detail) => {
                tracing::error!("Provisioning failed: {}", detail);
            }
            ServiceError::Internal(e) => {
                tracing::error!("Unhandled internal error: {:#}", e);
            }
            other => {
                tracing::warn!("Request rejected: {}", other);
            }
        }

        let body = json!({
            "success": false,
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = ServiceError::Internal(anyhow::anyhow!("connection pool exhausted at 0x1234"));
        assert_eq!(err.to_string(), "Server error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServiceError::NotFound("Key not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Forbidden("Not your key".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InsufficientBalance.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::RemoteUnavailable("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
