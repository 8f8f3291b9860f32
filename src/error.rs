use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::TransactionStatus;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Transaction is not pending (current status: {status})")]
    NotPending { status: TransactionStatus },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn is_not_pending(&self) -> bool {
        matches!(self, PaymentError::NotPending { .. })
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PaymentError::NotPending { .. } => (StatusCode::CONFLICT, "NOT_PENDING"),
            PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            PaymentError::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "DEVICE_NOT_FOUND"),
            PaymentError::Store(_) | PaymentError::Cache(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            PaymentError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, error_code) = self.status_and_code();

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code = error_code, "Request failed");
        } else {
            tracing::debug!(error = %self, error_code = error_code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}
