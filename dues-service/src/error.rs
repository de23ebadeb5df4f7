//! Domain error taxonomy for the dues engine and its HTTP mapping.

use crate::models::{ChargeStatus, ReferenceStatus};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by engine operations.
///
/// Every variant except `Storage` is recoverable by the caller and carries
/// enough detail to retry or correct the request.
#[derive(Debug, Error)]
pub enum DuesError {
    #[error("Resident {0} not found")]
    ResidentNotFound(Uuid),

    #[error("Charge {0} not found")]
    ChargeNotFound(Uuid),

    #[error("Payment reference '{0}' not found")]
    ReferenceNotFound(String),

    #[error("Charge {charge_id} is {status}, only pending charges can be referenced")]
    InvalidChargeState {
        charge_id: Uuid,
        status: ChargeStatus,
    },

    #[error("Payment reference '{code}' is {status}")]
    InvalidReferenceState {
        code: String,
        status: ReferenceStatus,
    },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Payment reference '{0}' has already been paid")]
    AlreadyRedeemed(String),

    #[error("Payment reference '{0}' has expired")]
    ReferenceExpired(String),

    #[error("{0}")]
    Validation(String),

    #[error("A resident with {field} '{value}' already exists")]
    DuplicateResident { field: &'static str, value: String },

    #[error("Reference code '{0}' is already in use")]
    ReferenceCodeCollision(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl DuesError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Stable machine-readable code, used by clients to branch on failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResidentNotFound(_) => "resident_not_found",
            Self::ChargeNotFound(_) => "charge_not_found",
            Self::ReferenceNotFound(_) => "reference_not_found",
            Self::InvalidChargeState { .. } => "invalid_charge_state",
            Self::InvalidReferenceState { .. } => "invalid_reference_state",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::AlreadyRedeemed(_) => "already_redeemed",
            Self::ReferenceExpired(_) => "reference_expired",
            Self::Validation(_) => "validation_error",
            Self::DuplicateResident { .. } => "duplicate_resident",
            Self::ReferenceCodeCollision(_) => "reference_code_collision",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ResidentNotFound(_) | Self::ChargeNotFound(_) | Self::ReferenceNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidChargeState { .. }
            | Self::InvalidReferenceState { .. }
            | Self::ConcurrentModification(_)
            | Self::AlreadyRedeemed(_)
            | Self::DuplicateResident { .. } => StatusCode::CONFLICT,
            Self::ReferenceExpired(_) => StatusCode::GONE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ReferenceCodeCollision(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the request failed on infrastructure rather than input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::ReferenceCodeCollision(_))
    }
}

impl From<validator::ValidationErrors> for DuesError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(format!("Invalid request: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for DuesError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_fatal() {
            tracing::error!(error = %self, "Request failed on storage");
            "Database error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.code(),
            }),
        )
            .into_response()
    }
}
