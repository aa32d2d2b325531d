//! Public tokenized link handlers. No API key: the token is the credential.
//!
//! - GET /r/{token} - View (and open) a review request
//! - POST /r/{token}/feedback - Submit a rating and comment
//! - GET|POST /r/{token}/opt-out?signature=... - Stop future review requests

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;

use crate::audit::{Actor, AuditContext, RequestMeta};
use crate::error::AppError;
use crate::models::feedback::{FeedbackResponse, SubmitFeedbackPayload};
use crate::services::public_link_service::{self, OptOutResponse, PublicReviewRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OptOutQuery {
    pub signature: Option<String>,
}

fn customer_context(meta: RequestMeta) -> AuditContext {
    AuditContext::new(Actor::System, Some(meta)).with_tag("public_link")
}

/// # Response
///
/// - **Success (200 OK)**: Business name, subject, message, status
/// - **Error (404)**: Unknown token
pub async fn view_review_request(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
) -> Result<Json<PublicReviewRequest>, AppError> {
    let ctx = customer_context(meta);
    let view = public_link_service::view(&state, &token, &ctx, Utc::now()).await?;
    Ok(Json(view))
}

/// # Request Body
///
/// ```json
/// { "rating": 5, "comment": "Lovely service" }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: The stored feedback
/// - **Error (404)**: Unknown token
/// - **Error (422)**: Invalid rating, or the request is expired or already completed
pub async fn submit_feedback(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
    payload: Result<Json<SubmitFeedbackPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    let Json(payload) = payload?;
    let command = payload.into_command()?;
    let ctx = customer_context(meta);

    let feedback =
        public_link_service::submit_feedback(&state, &token, command, &ctx, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// # Response
///
/// - **Success (200 OK)**: `{ "opted_out": true }`
/// - **Error (403)**: Missing or invalid signature
/// - **Error (404)**: Unknown token
pub async fn opt_out(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(token): Path<String>,
    Query(query): Query<OptOutQuery>,
) -> Result<Json<OptOutResponse>, AppError> {
    let signature = query.signature.ok_or(AppError::Forbidden)?;
    let ctx = customer_context(meta);
    Ok(Json(
        public_link_service::opt_out(&state, &token, &signature, &ctx).await?,
    ))
}
