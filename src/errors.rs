use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no active credential available for service '{service}'")]
    KeyNotFound { service: String },

    #[error("credential {id} not found")]
    CredentialNotFound { id: Uuid },

    #[error("decryption failed{}: {reason}", credential_id.map(|id| format!(" for credential {id}")).unwrap_or_default())]
    DecryptionFailed {
        credential_id: Option<Uuid>,
        reason: String,
    },

    #[error("all active credentials for service '{service}' have reached their usage limit")]
    QuotaExceeded { service: String },

    #[error("upstream service unavailable after {attempts} attempt(s): {message}")]
    ServiceUnavailable { attempts: u32, message: String },

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("secret does not match the expected key format for service '{service}'")]
    InvalidFormat { service: String },

    #[error("database error: {0:#}")]
    Database(#[source] anyhow::Error),

    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl PoolError {
    pub(crate) fn decryption(credential_id: Option<Uuid>, reason: impl Into<String>) -> Self {
        PoolError::DecryptionFailed {
            credential_id,
            reason: reason.into(),
        }
    }

    /// Re-tag a codec error with the credential it was decrypting.
    pub(crate) fn for_credential(self, id: Uuid) -> Self {
        match self {
            PoolError::DecryptionFailed { reason, .. } => PoolError::DecryptionFailed {
                credential_id: Some(id),
                reason,
            },
            other => other,
        }
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            PoolError::KeyNotFound { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "pool_exhausted",
                "key_not_found",
                self.to_string(),
            ),
            PoolError::CredentialNotFound { .. } => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "credential_not_found",
                self.to_string(),
            ),
            PoolError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "quota_exceeded",
                self.to_string(),
            ),
            PoolError::ServiceUnavailable { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream_error",
                "service_unavailable",
                self.to_string(),
            ),
            PoolError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.to_string(),
            ),
            PoolError::InvalidFormat { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "invalid_key_format",
                self.to_string(),
            ),
            PoolError::DecryptionFailed { .. } => {
                tracing::error!("Decryption error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "decryption_failed",
                    "stored credential could not be decrypted".to_string(),
                )
            }
            PoolError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            PoolError::Database(e) => {
                tracing::error!("Database error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, PoolError::QuotaExceeded { .. }) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("3600"),
            );
        }

        response
    }
}
