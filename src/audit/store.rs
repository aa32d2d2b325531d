//! Store decorator that records audit entries for every successful write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    AuditContext, Auditable, created_entry, deleted_entry, restored_entry, updated_entry,
};
use crate::error::AppError;
use crate::models::api_key::ApiKey;
use crate::models::audit_log::AuditLog;
use crate::models::business::Business;
use crate::models::customer::Customer;
use crate::models::dispatch_task::DispatchTask;
use crate::models::feedback::{Feedback, FeedbackUpdate, ModerationStatus};
use crate::models::pagination::{Page, PageRequest};
use crate::models::review_request::{ReviewRequest, ReviewRequestFilter};
use crate::models::user::User;
use crate::repositories::{Change, DeliveryUpdate, FeedbackSubmission, Store};

/// Wraps a [`Store`] and appends an [`AuditLog`] after each write on an
/// auditable entity.
///
/// Audit entries are written after the primary write has committed. A failure
/// to append is logged and does not fail the write.
#[derive(Debug, Clone)]
pub struct AuditedStore<S> {
    inner: S,
}

impl<S: Store> AuditedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn append(&self, entry: AuditLog) {
        if let Err(e) = self.inner.append_audit_log(&entry).await {
            tracing::error!(
                error = %e,
                auditable_type = %entry.auditable_type,
                auditable_id = %entry.auditable_id,
                event = %entry.event,
                "failed to append audit log"
            );
        }
    }

    async fn created<T: Auditable + Sync>(&self, entity: &T, ctx: &AuditContext) {
        self.append(created_entry(entity, ctx)).await;
    }

    async fn updated<T: Auditable + Sync>(&self, change: &Option<Change<T>>, ctx: &AuditContext) {
        if let Some(entry) = change.as_ref().and_then(|c| updated_entry(c, ctx)) {
            self.append(entry).await;
        }
    }
}

#[async_trait]
impl<S: Store> Store for AuditedStore<S> {
    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }

    async fn find_business(&self, id: Uuid) -> Result<Option<Business>, AppError> {
        self.inner.find_business(id).await
    }

    async fn insert_business(
        &self,
        business: &Business,
        ctx: &AuditContext,
    ) -> Result<Business, AppError> {
        let stored = self.inner.insert_business(business, ctx).await?;
        self.created(&stored, ctx).await;
        Ok(stored)
    }

    async fn insert_user(&self, user: &User, ctx: &AuditContext) -> Result<User, AppError> {
        let stored = self.inner.insert_user(user, ctx).await?;
        self.created(&stored, ctx).await;
        Ok(stored)
    }

    async fn active_api_keys(&self) -> Result<Vec<ApiKey>, AppError> {
        self.inner.active_api_keys().await
    }

    async fn insert_api_key(&self, key: &ApiKey, ctx: &AuditContext) -> Result<ApiKey, AppError> {
        let stored = self.inner.insert_api_key(key, ctx).await?;
        self.created(&stored, ctx).await;
        Ok(stored)
    }

    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ApiKey>>, AppError> {
        let change = self.inner.set_api_key_active(id, active, ctx).await?;
        if let Some(change) = &change {
            let entry = if active {
                restored_entry(change, ctx)
            } else {
                updated_entry(change, ctx)
            };
            if let Some(entry) = entry {
                self.append(entry).await;
            }
        }
        Ok(change)
    }

    async fn record_api_key_usage(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AppError> {
        self.inner.record_api_key_usage(id, at, ip).await
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        self.inner.find_customer(id).await
    }

    async fn first_or_create_customer(
        &self,
        customer: &Customer,
        ctx: &AuditContext,
    ) -> Result<(Customer, bool), AppError> {
        let (stored, created) = self.inner.first_or_create_customer(customer, ctx).await?;
        if created {
            self.created(&stored, ctx).await;
        }
        Ok((stored, created))
    }

    async fn set_customer_opted_out(
        &self,
        id: Uuid,
        opted_out: bool,
        ctx: &AuditContext,
    ) -> Result<Option<Change<Customer>>, AppError> {
        let change = self.inner.set_customer_opted_out(id, opted_out, ctx).await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn find_review_request(&self, id: Uuid) -> Result<Option<ReviewRequest>, AppError> {
        self.inner.find_review_request(id).await
    }

    async fn find_review_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReviewRequest>, AppError> {
        self.inner.find_review_request_by_token(token).await
    }

    async fn list_review_requests(
        &self,
        business_id: Uuid,
        filter: ReviewRequestFilter,
        page: PageRequest,
    ) -> Result<Page<ReviewRequest>, AppError> {
        self.inner.list_review_requests(business_id, filter, page).await
    }

    async fn create_review_request(
        &self,
        request: &ReviewRequest,
        task: Option<&DispatchTask>,
        ctx: &AuditContext,
    ) -> Result<ReviewRequest, AppError> {
        let stored = self.inner.create_review_request(request, task, ctx).await?;
        self.created(&stored, ctx).await;
        Ok(stored)
    }

    async fn update_review_request_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let change = self.inner.update_review_request_delivery(id, update, ctx).await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn mark_review_request_sent(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let change = self
            .inner
            .mark_review_request_sent(id, scheduled_for, sent_at, expires_at, ctx)
            .await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn mark_review_request_opened(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let change = self.inner.mark_review_request_opened(id, at, ctx).await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn expire_review_request(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let change = self.inner.expire_review_request(id, at, ctx).await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn expire_overdue_review_requests(
        &self,
        at: DateTime<Utc>,
        limit: i64,
        ctx: &AuditContext,
    ) -> Result<Vec<Change<ReviewRequest>>, AppError> {
        let changes = self.inner.expire_overdue_review_requests(at, limit, ctx).await?;
        for change in &changes {
            if let Some(entry) = updated_entry(change, ctx) {
                self.append(entry).await;
            }
        }
        Ok(changes)
    }

    async fn delete_review_request(
        &self,
        id: Uuid,
        ctx: &AuditContext,
    ) -> Result<Option<ReviewRequest>, AppError> {
        let deleted = self.inner.delete_review_request(id, ctx).await?;
        if let Some(request) = &deleted {
            self.append(deleted_entry(request, ctx)).await;
        }
        Ok(deleted)
    }

    async fn submit_feedback(
        &self,
        feedback: &Feedback,
        review_request_id: Uuid,
        ctx: &AuditContext,
    ) -> Result<FeedbackSubmission, AppError> {
        let submission = self
            .inner
            .submit_feedback(feedback, review_request_id, ctx)
            .await?;
        self.created(&submission.feedback, ctx).await;
        if let Some(entry) = updated_entry(&submission.request, ctx) {
            self.append(entry).await;
        }
        Ok(submission)
    }

    async fn find_feedback(&self, id: Uuid) -> Result<Option<Feedback>, AppError> {
        self.inner.find_feedback(id).await
    }

    async fn feedback_for_review_request(
        &self,
        review_request_id: Uuid,
    ) -> Result<Vec<Feedback>, AppError> {
        self.inner.feedback_for_review_request(review_request_id).await
    }

    async fn list_feedback(
        &self,
        business_id: Uuid,
        moderation_status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>, AppError> {
        self.inner
            .list_feedback(business_id, moderation_status, page)
            .await
    }

    async fn update_feedback(
        &self,
        id: Uuid,
        update: &FeedbackUpdate,
        now: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<Feedback>>, AppError> {
        let change = self.inner.update_feedback(id, update, now, ctx).await?;
        self.updated(&change, ctx).await;
        Ok(change)
    }

    async fn claim_due_dispatch_tasks(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<DispatchTask>, AppError> {
        self.inner.claim_due_dispatch_tasks(now, lease, limit).await
    }

    async fn complete_dispatch_task(&self, id: Uuid) -> Result<(), AppError> {
        self.inner.complete_dispatch_task(id).await
    }

    async fn fail_dispatch_task(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.fail_dispatch_task(id, error, now).await
    }

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<(), AppError> {
        self.inner.append_audit_log(entry).await
    }

    async fn audit_logs_for(
        &self,
        auditable_type: &str,
        auditable_id: Uuid,
    ) -> Result<Vec<AuditLog>, AppError> {
        self.inner.audit_logs_for(auditable_type, auditable_id).await
    }
}
