//! API error type and its HTTP mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use vigil_lifecycle::LifecycleError;

use crate::envelope::{Collection, CollectionType};

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Engine error.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Malformed request that never reached the engine.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The addressed resource does not exist under this path.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// HTTP status of the error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Lifecycle(e) => match e {
                LifecycleError::NotFound(_)
                | LifecycleError::VersionNotFound { .. }
                | LifecycleError::NoPreviousVersion(_)
                | LifecycleError::CredentialNotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::SecretLocked { .. }
                | LifecycleError::AlreadyRevoked(_)
                | LifecycleError::GroupNotEmpty { .. }
                | LifecycleError::AlreadyExists(_)
                | LifecycleError::InvalidState(_) => StatusCode::CONFLICT,
                LifecycleError::Validation(_) | LifecycleError::UnsupportedOperation { .. } => {
                    StatusCode::BAD_REQUEST
                }
                LifecycleError::IssuanceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                LifecycleError::IssuanceFailed { .. } => StatusCode::BAD_GATEWAY,
                LifecycleError::Storage(_)
                | LifecycleError::Crypto(_)
                | LifecycleError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Lifecycle(e) => match e {
                LifecycleError::NotFound(_) => "not_found",
                LifecycleError::VersionNotFound { .. } => "version_not_found",
                LifecycleError::NoPreviousVersion(_) => "no_previous_version",
                LifecycleError::SecretLocked { .. } => "secret_locked",
                LifecycleError::AlreadyRevoked(_) => "already_revoked",
                LifecycleError::CredentialNotFound(_) => "credential_not_found",
                LifecycleError::GroupNotEmpty { .. } => "group_not_empty",
                LifecycleError::IssuanceTimeout { .. } => "issuance_timeout",
                LifecycleError::IssuanceFailed { .. } => "issuance_failed",
                LifecycleError::Validation(_) => "validation_error",
                LifecycleError::AlreadyExists(_) => "already_exists",
                LifecycleError::InvalidState(_) => "invalid_state",
                LifecycleError::UnsupportedOperation { .. } => "unsupported_operation",
                LifecycleError::Storage(_)
                | LifecycleError::Crypto(_)
                | LifecycleError::Serialization(_) => "internal_error",
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("invalid request body: {e}"))
    }
}

/// One entry of an error collection.
#[derive(Debug, Serialize)]
struct ErrorResource {
    code: &'static str,
    error_message: String,
    status_code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        // Internal details stay in the log.
        let message = match &self {
            ApiError::Lifecycle(
                LifecycleError::Storage(_)
                | LifecycleError::Crypto(_)
                | LifecycleError::Serialization(_),
            ) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = Collection::one(
            CollectionType::Error,
            ErrorResource {
                code: self.code(),
                error_message: message,
                status_code: status.as_u16(),
            },
        );
        (status, Json(body)).into_response()
    }
}
