//! Customer-facing actions reached through the tokenized public link.
//!
//! The token is the only credential. Writes are attributed to the system actor
//! together with the request metadata of the customer's browser.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::feedback::{Feedback, FeedbackResponse, ModerationStatus, SubmitFeedback};
use crate::models::review_request::{ReviewRequest, Status};
use crate::notifications::Notification;
use crate::state::AppState;

/// What the customer sees when following the link.
#[derive(Debug, Serialize)]
pub struct PublicReviewRequest {
    pub business_name: String,
    pub customer_name: String,
    pub subject: String,
    pub message: String,
    pub status: Status,
    pub expires_at: DateTime<Utc>,
    pub accepts_feedback: bool,
}

#[derive(Debug, Serialize)]
pub struct OptOutResponse {
    pub opted_out: bool,
}

async fn find_by_token(state: &AppState, token: &str) -> Result<ReviewRequest, AppError> {
    state
        .store
        .find_review_request_by_token(token)
        .await?
        .ok_or(AppError::NotFound)
}

/// Moves an overdue request to `expired`, returning the current record.
async fn expire_if_overdue(
    state: &AppState,
    request: ReviewRequest,
    now: DateTime<Utc>,
    ctx: &AuditContext,
) -> Result<ReviewRequest, AppError> {
    if !request.is_overdue(now) {
        return Ok(request);
    }
    match state.store.expire_review_request(request.id, now, ctx).await? {
        Some(change) => {
            tracing::info!(review_request_id = %request.id, "review request expired on access");
            Ok(change.after)
        }
        // completed (or expired) concurrently
        None => Ok(state
            .store
            .find_review_request(request.id)
            .await?
            .unwrap_or(request)),
    }
}

/// `GET /r/{token}`: marks a pending request as opened.
pub async fn view(
    state: &AppState,
    token: &str,
    ctx: &AuditContext,
    now: DateTime<Utc>,
) -> Result<PublicReviewRequest, AppError> {
    let request = find_by_token(state, token).await?;
    let mut request = expire_if_overdue(state, request, now, ctx).await?;

    if request.status == Status::Pending {
        if let Some(change) = state
            .store
            .mark_review_request_opened(request.id, now, ctx)
            .await?
        {
            tracing::info!(review_request_id = %request.id, "review request opened");
            request = change.after;
        }
    }

    let customer = state.store.find_customer(request.customer_id).await?;
    let business = state.store.find_business(request.business_id).await?;

    Ok(PublicReviewRequest {
        business_name: business.map(|b| b.name).unwrap_or_default(),
        customer_name: customer.map(|c| c.name).unwrap_or_default(),
        accepts_feedback: request.ensure_accepts_feedback(now).is_ok(),
        subject: request.subject,
        message: request.message,
        status: request.status,
        expires_at: request.expires_at,
    })
}

/// `POST /r/{token}/feedback`
///
/// # Process
///
/// 1. Expire the request first if it is overdue
/// 2. Reject completed or expired requests
/// 3. Store the feedback, complete the request and bump the customer ledger together
/// 4. Notify the business
///
/// # Errors
///
/// - `NotFound`: unknown token
/// - `BusinessRule`: expired or already completed
pub async fn submit_feedback(
    state: &AppState,
    token: &str,
    command: SubmitFeedback,
    ctx: &AuditContext,
    now: DateTime<Utc>,
) -> Result<FeedbackResponse, AppError> {
    let request = find_by_token(state, token).await?;
    let request = expire_if_overdue(state, request, now, ctx).await?;
    request.ensure_accepts_feedback(now)?;

    let feedback = Feedback {
        id: Uuid::new_v4(),
        business_id: request.business_id,
        customer_id: Some(request.customer_id),
        review_request_id: Some(request.id),
        rating: command.rating,
        comment: command.comment,
        sentiment: None,
        moderation_status: ModerationStatus::Published,
        is_public: true,
        reply: None,
        replied_at: None,
        submitted_at: now,
        created_at: now,
        updated_at: now,
    };

    let submission = state.store.submit_feedback(&feedback, request.id, ctx).await?;
    let feedback = submission.feedback;
    tracing::info!(
        feedback_id = %feedback.id,
        review_request_id = %request.id,
        business_id = %feedback.business_id,
        rating = feedback.rating,
        "feedback received"
    );

    notify_business(state, &feedback).await;
    Ok(feedback.into())
}

async fn notify_business(state: &AppState, feedback: &Feedback) {
    let business = match state.store.find_business(feedback.business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => return,
        Err(e) => {
            tracing::error!(feedback_id = %feedback.id, error = %e, "failed to load business for notification");
            return;
        }
    };
    let customer_name = match feedback.customer_id {
        Some(id) => state
            .store
            .find_customer(id)
            .await
            .ok()
            .flatten()
            .map(|c| c.name),
        None => None,
    };

    let notification = Notification::FeedbackReceived {
        feedback_id: feedback.id,
        business_name: business.name,
        business_email: business.email,
        customer_name,
        rating: feedback.rating,
        comment: feedback.comment.clone(),
    };
    if let Err(e) = state.notifier.dispatch(notification).await {
        tracing::error!(feedback_id = %feedback.id, error = %e, "failed to dispatch feedback notification");
    }
}

/// `POST /r/{token}/opt-out?signature=...`. Idempotent.
///
/// # Errors
///
/// - `Forbidden`: signature missing or invalid
/// - `NotFound`: unknown token
pub async fn opt_out(
    state: &AppState,
    token: &str,
    signature: &str,
    ctx: &AuditContext,
) -> Result<OptOutResponse, AppError> {
    if !state.links.verify_opt_out(token, signature) {
        return Err(AppError::Forbidden);
    }
    let request = find_by_token(state, token).await?;

    if state
        .store
        .set_customer_opted_out(request.customer_id, true, ctx)
        .await?
        .is_some()
    {
        tracing::info!(customer_id = %request.customer_id, "customer opted out");
    }
    Ok(OptOutResponse { opted_out: true })
}
