// ============================================================================
// Error Handling - HTTP error responses
// ============================================================================
//
// Every service error is mapped to an AppError here. Internal failures
// (storage, encryption) are logged server-side and answered with a generic
// message. Domain errors (missing credentials, test required, in-progress)
// carry developer-controlled messages only; credentials never appear.
//
// Body shape: { "error": "<message>", "status": <code> }
//
// ============================================================================

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::services::erp::erp_connection_service::ErpConnectionError;
use crate::services::erp::erp_sync_service::SyncError;
use crate::services::erp::field_mapping::UnknownField;
use crate::services::erp::sync_configuration::ConfigurationError;
use crate::services::identity_service::IdentityError;
use crate::services::vendor_directory_service::DirectoryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] JsonRejection),

    #[error("Query error: {0}")]
    Query(#[from] QueryRejection),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request is well-formed but the configuration is not in a state that allows it
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("ERP unreachable: {0}")]
    BadGateway(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<UnknownField> for AppError {
    fn from(err: UnknownField) -> Self {
        AppError::NotFound(err.to_string())
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UnknownCompany(_) | DirectoryError::VendorNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            DirectoryError::DuplicateVendor(_) | DirectoryError::KeyConflict(_) => {
                AppError::Conflict(err.to_string())
            }
            DirectoryError::Identity(e) => e.into(),
        }
    }
}

impl From<ConfigurationError> for AppError {
    fn from(err: ConfigurationError) -> Self {
        match err {
            ConfigurationError::MissingCredentials | ConfigurationError::TestRequired => {
                AppError::Unprocessable(err.to_string())
            }
            ConfigurationError::OperationInProgress => AppError::Conflict(err.to_string()),
            ConfigurationError::InvalidValue(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<ErpConnectionError> for AppError {
    fn from(err: ErpConnectionError) -> Self {
        match err {
            ErpConnectionError::Configuration(e) => e.into(),
            ErpConnectionError::Repository(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConfigured | SyncError::MissingCredentials => AppError::Unprocessable(err.to_string()),
            SyncError::OperationInProgress => AppError::Conflict(err.to_string()),
            SyncError::ConnectionFailed(_) => AppError::BadGateway(err.to_string()),
            SyncError::Cancelled | SyncError::TimedOut | SyncError::PartialSyncFailure { .. } => {
                AppError::Conflict(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(ref e) => {
                tracing::debug!("Validation failed: {}", e);
                (StatusCode::BAD_REQUEST, "Validation failed".to_string())
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "Invalid JSON".to_string()),
            AppError::Query(_) => (StatusCode::BAD_REQUEST, "Invalid query parameters".to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::BadGateway(msg) => {
                tracing::warn!("ERP gateway error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Could not reach the ERP".to_string())
            }
            AppError::Internal(err) => {
                // 🔒 Details stay in the server log
                tracing::error!("Internal error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
