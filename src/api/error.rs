//! HTTP error responses.
//!
//! Validation and upstream failures answer `{"error": ...}`; lookups answer
//! `{"status": "error", "message": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Request failed validation
    BadRequest(String),
    /// `job_id` missing or not a UUID
    InvalidJobId,
    JobNotFound,
    /// The payment service rejected or failed the request
    PaymentService(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::InvalidJobId => (
                StatusCode::BAD_REQUEST,
                json!({ "status": "error", "message": "Invalid job_id" }),
            ),
            ApiError::JobNotFound => (
                StatusCode::NOT_FOUND,
                json!({ "status": "error", "message": "Job not found" }),
            ),
            ApiError::PaymentService(message) => {
                (StatusCode::BAD_GATEWAY, json!({ "error": message }))
            }
            ApiError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
