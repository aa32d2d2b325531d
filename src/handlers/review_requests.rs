//! Review request HTTP handlers.
//!
//! This module implements the review request API endpoints:
//! - GET /api/v1/review-requests - List requests of the authenticated business
//! - POST /api/v1/review-requests - Create a request
//! - GET /api/v1/review-requests/{id} - Show one request with customer and feedback
//! - PUT /api/v1/review-requests/{id} - Reschedule an unsent request
//! - DELETE /api/v1/review-requests/{id} - Delete a request
//! - POST /api/v1/review-requests/{id}/send - Send an unsent request now

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use uuid::Uuid;

use super::audit_context;
use crate::audit::RequestMeta;
use crate::error::AppError;
use crate::models::pagination::Paginated;
use crate::models::review_request::{
    CreateReviewRequestPayload, ReviewRequestQuery, ReviewRequestResponse,
    UpdateReviewRequestPayload,
};
use crate::policy::Principal;
use crate::services::review_request_service;
use crate::state::AppState;

/// List review requests.
///
/// # Query Parameters
///
/// - `status` - `pending`, `opened`, `completed` or `expired`
/// - `send_mode` - `now`, `scheduled` or `manual`
/// - `page`, `per_page` - pagination (default 15 per page, max 100)
///
/// # Response
///
/// - **Success (200 OK)**: `{ "data": [...], "meta": {...} }`
/// - **Error (403)**: Key lacks `review-requests.read`
/// - **Error (422)**: Unknown filter value
pub async fn list_review_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<ReviewRequestQuery>, QueryRejection>,
) -> Result<Json<Paginated<ReviewRequestResponse>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::field("query", e.body_text()))?;
    let page = review_request_service::list(&state, &principal, query).await?;
    Ok(Json(page))
}

/// Create a review request.
///
/// # Request Body
///
/// ```json
/// {
///   "customer": { "name": "Grace Hopper", "email": "grace@example.com" },
///   "subject": "How did we do?",
///   "message": "We would love your feedback.",
///   "send_mode": "scheduled",
///   "schedule_hours": 24
/// }
/// ```
///
/// `customer_id` may be given instead of `customer`.
///
/// # Response
///
/// - **Success (201 Created)**: The created request with its customer
/// - **Error (403)**: Key lacks `review-requests.create`
/// - **Error (422)**: Validation failure or opted-out customer
pub async fn create_review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(meta): Extension<RequestMeta>,
    payload: Result<Json<CreateReviewRequestPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewRequestResponse>), AppError> {
    let Json(payload) = payload?;
    let command = payload.into_command()?;
    let ctx = audit_context(&principal, meta);

    let created = review_request_service::create(&state, &principal, &ctx, command).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Show a review request.
///
/// # Response
///
/// - **Success (200 OK)**: The request with `customer` and `feedback`
/// - **Error (403)**: Missing permission, unknown id, or owned by another business
pub async fn get_review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ReviewRequestResponse>, AppError> {
    let Path(id) = path?;
    let request = review_request_service::show(&state, &principal, id).await?;
    Ok(Json(request))
}

/// Change `send_mode` / `schedule_hours` of an unsent request.
///
/// # Response
///
/// - **Success (200 OK)**: The updated request
/// - **Error (422)**: Already sent or expired, or validation failure
pub async fn update_review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateReviewRequestPayload>, JsonRejection>,
) -> Result<Json<ReviewRequestResponse>, AppError> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    let delivery = payload.into_delivery()?;
    let ctx = audit_context(&principal, meta);

    let updated = review_request_service::update(&state, &principal, &ctx, id, delivery).await?;
    Ok(Json(updated))
}

/// Delete a review request.
///
/// # Response
///
/// - **Success (204 No Content)**
/// - **Error (403)**: Missing permission, unknown id, or owned by another business
pub async fn delete_review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = path?;
    let ctx = audit_context(&principal, meta);
    review_request_service::delete(&state, &principal, &ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send an unsent request immediately.
///
/// # Response
///
/// - **Success (200 OK)**: The sent request
/// - **Error (422)**: Already sent or expired
pub async fn send_review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ReviewRequestResponse>, AppError> {
    let Path(id) = path?;
    let ctx = audit_context(&principal, meta);
    let sent = review_request_service::send_now(&state, &principal, &ctx, id).await?;
    Ok(Json(sent))
}
