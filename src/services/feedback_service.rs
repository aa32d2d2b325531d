//! Operator access to feedback: listing and moderation.

use chrono::Utc;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::feedback::{FeedbackQuery, FeedbackResponse, FeedbackUpdate};
use crate::models::pagination::{PageRequest, Paginated};
use crate::policy::{self, Permission, Principal, Resource};
use crate::state::AppState;

/// `GET /feedback`, newest first.
pub async fn list(
    state: &AppState,
    principal: &Principal,
    query: FeedbackQuery,
) -> Result<Paginated<FeedbackResponse>, AppError> {
    policy::authorize(principal, Permission::FeedbackRead, Resource::Collection).into_result()?;
    let moderation_status = query.moderation_filter()?;
    let page = PageRequest::new(query.page, query.per_page);

    let page = state
        .store
        .list_feedback(principal.business_id, moderation_status, page)
        .await?;
    Ok(page.map(FeedbackResponse::from).into())
}

/// `PATCH /feedback/{id}`
pub async fn update(
    state: &AppState,
    principal: &Principal,
    ctx: &AuditContext,
    id: Uuid,
    update: FeedbackUpdate,
) -> Result<FeedbackResponse, AppError> {
    let feedback = state.store.find_feedback(id).await?;
    let resource = feedback
        .as_ref()
        .map_or(Resource::Missing, |f| Resource::OwnedBy(f.business_id));
    policy::authorize(principal, Permission::FeedbackUpdate, resource).into_result()?;

    let change = state
        .store
        .update_feedback(id, &update, Utc::now(), ctx)
        .await?
        .ok_or(AppError::Forbidden)?;
    tracing::info!(feedback_id = %id, "feedback moderated");
    Ok(change.after.into())
}
