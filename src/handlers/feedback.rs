//! Feedback moderation HTTP handlers.
//!
//! - GET /api/v1/feedback - List feedback of the authenticated business
//! - PATCH /api/v1/feedback/{id} - Moderate, reply to, or edit one entry

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use uuid::Uuid;

use super::audit_context;
use crate::audit::RequestMeta;
use crate::error::AppError;
use crate::models::feedback::{FeedbackQuery, FeedbackResponse, UpdateFeedbackPayload};
use crate::models::pagination::Paginated;
use crate::policy::Principal;
use crate::services::feedback_service;
use crate::state::AppState;

/// List feedback, optionally filtered by `moderation_status`. Requires `feedback.read`.
pub async fn list_feedback(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<FeedbackQuery>, QueryRejection>,
) -> Result<Json<Paginated<FeedbackResponse>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::field("query", e.body_text()))?;
    Ok(Json(feedback_service::list(&state, &principal, query).await?))
}

/// Update `moderation_status`, `is_public`, `reply` and/or `comment`.
/// Requires `feedback.update`.
pub async fn update_feedback(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateFeedbackPayload>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    let update = payload.into_update()?;
    let ctx = audit_context(&principal, meta);

    let feedback = feedback_service::update(&state, &principal, &ctx, id, update).await?;
    Ok(Json(feedback))
}
