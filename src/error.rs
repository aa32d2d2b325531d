//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Field name -> human readable messages, as returned in 422 responses.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Authentication**: credential missing or not accepted (401)
/// - **Authorization**: permission missing or resource outside the tenant (403)
/// - **Validation**: malformed or missing input, reported per field (422)
/// - **Business rules**: opted-out customer, already-sent or expired request (422)
/// - **Infrastructure**: database or mail relay faults (500, details hidden)
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No credential was presented.
    #[error("API key required. Send it in the X-API-Key header or as Authorization: Bearer <key>")]
    MissingApiKey,

    /// Credential unknown, revoked, expired, or its business is deactivated.
    #[error("Invalid or expired API key")]
    InvalidApiKey,

    /// Credential is valid but lacks the permission for this operation.
    #[error("API key lacks the required permission: {0}")]
    MissingPermission(String),

    /// Generic authorization failure. Also used for unknown ids so that
    /// resources of other tenants cannot be probed.
    #[error("This action is unauthorized")]
    Forbidden,

    /// Unknown public token.
    #[error("Resource not found")]
    NotFound,

    /// Request input failed validation.
    #[error("The given data was invalid")]
    Validation(FieldErrors),

    /// Operation conflicts with the current state of the resource.
    #[error("{0}")]
    BusinessRule(String),

    /// Unexpected internal fault (mail relay, serialization).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-field validation error.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }

    pub fn customer_opted_out() -> Self {
        AppError::BusinessRule("This customer has opted out of review requests".to_string())
    }
}

/// Malformed JSON bodies are reported like any other validation failure.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::field("body", rejection.body_text())
    }
}

/// A malformed `{id}` segment.
impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::field("id", rejection.body_text())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message",
///     "fields": { "subject": ["The subject field is required."] }
///   }
/// }
/// ```
///
/// `fields` is only present for validation errors.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing_api_key"),
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            AppError::MissingPermission(_) => (StatusCode::FORBIDDEN, "missing_permission"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            AppError::BusinessRule(_) => (StatusCode::UNPROCESSABLE_ENTITY, "business_rule"),
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = match self {
            AppError::Validation(fields) => json!({
                "error": { "code": code, "message": message, "fields": fields }
            }),
            _ => json!({
                "error": { "code": code, "message": message }
            }),
        };

        (status, Json(body)).into_response()
    }
}
