//! Persistence boundary.
//!
//! [`Store`] is implemented by [`PgStore`] (PostgreSQL) and [`MemoryStore`]
//! (in-process). Services hold an `Arc<dyn Store>` that in practice is an
//! [`crate::audit::AuditedStore`] wrapping one of them.
//!
//! Writes that touch several rows are atomic: a review request insert, the
//! customer counter increment and the deferred dispatch task commit together.
//! Counter increments happen in the storage layer, never as read-modify-write
//! in application memory. State transitions are conditional updates that
//! return `None` when their guard no longer holds.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::api_key::ApiKey;
use crate::models::audit_log::AuditLog;
use crate::models::business::Business;
use crate::models::customer::Customer;
use crate::models::dispatch_task::DispatchTask;
use crate::models::feedback::{Feedback, FeedbackUpdate, ModerationStatus};
use crate::models::pagination::{Page, PageRequest};
use crate::models::review_request::{DeliveryPlan, ReviewRequest, ReviewRequestFilter};
use crate::models::user::User;

/// Before and after images of one updated row.
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub before: T,
    pub after: T,
}

/// Result of a feedback submission: the new feedback and the completed request.
#[derive(Debug, Clone)]
pub struct FeedbackSubmission {
    pub feedback: Feedback,
    pub request: Change<ReviewRequest>,
}

/// Delivery columns written by a reschedule or an operator "send now".
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub plan: DeliveryPlan,
    /// Task to enqueue when the new plan is deferred.
    pub task: Option<DispatchTask>,
    pub now: DateTime<Utc>,
}

/// Failed dispatch attempts before a task is parked as `failed`.
pub const MAX_DISPATCH_ATTEMPTS: i32 = 5;

/// Delay before retrying a failed dispatch attempt.
pub fn dispatch_backoff(attempts: i32) -> Duration {
    Duration::minutes(i64::from(attempts.clamp(1, MAX_DISPATCH_ATTEMPTS)) * 2)
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Connectivity check for `/health`.
    async fn ping(&self) -> Result<(), AppError>;

    // --- businesses and operators ---

    async fn find_business(&self, id: Uuid) -> Result<Option<Business>, AppError>;

    async fn insert_business(
        &self,
        business: &Business,
        ctx: &AuditContext,
    ) -> Result<Business, AppError>;

    async fn insert_user(&self, user: &User, ctx: &AuditContext) -> Result<User, AppError>;

    // --- API keys ---

    /// All keys with `is_active = true`, whatever their expiry.
    async fn active_api_keys(&self) -> Result<Vec<ApiKey>, AppError>;

    async fn insert_api_key(&self, key: &ApiKey, ctx: &AuditContext) -> Result<ApiKey, AppError>;

    /// Revokes (`false`) or restores (`true`). `None` when the key does not exist
    /// or already had that state.
    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ApiKey>>, AppError>;

    /// Usage bookkeeping; not part of the audit trail.
    async fn record_api_key_usage(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AppError>;

    // --- customers ---

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError>;

    /// Inserts unless a customer with the same email exists in the business.
    /// Returns the stored row and whether it was created.
    async fn first_or_create_customer(
        &self,
        customer: &Customer,
        ctx: &AuditContext,
    ) -> Result<(Customer, bool), AppError>;

    async fn set_customer_opted_out(
        &self,
        id: Uuid,
        opted_out: bool,
        ctx: &AuditContext,
    ) -> Result<Option<Change<Customer>>, AppError>;

    // --- review requests ---

    async fn find_review_request(&self, id: Uuid) -> Result<Option<ReviewRequest>, AppError>;

    async fn find_review_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReviewRequest>, AppError>;

    async fn list_review_requests(
        &self,
        business_id: Uuid,
        filter: ReviewRequestFilter,
        page: PageRequest,
    ) -> Result<Page<ReviewRequest>, AppError>;

    /// Inserts the request, increments the customer's `total_requests_sent`, and
    /// enqueues `task`, all or nothing. Fails with a business rule error when the
    /// customer has opted out by the time the row is locked.
    async fn create_review_request(
        &self,
        request: &ReviewRequest,
        task: Option<&DispatchTask>,
        ctx: &AuditContext,
    ) -> Result<ReviewRequest, AppError>;

    /// Applies a reschedule or send-now. `None` when the request is gone, was
    /// sent meanwhile, or has expired.
    async fn update_review_request_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError>;

    /// Deferred send. Guarded on: unsent, still scheduled for `scheduled_for`, open.
    async fn mark_review_request_sent(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError>;

    /// `pending -> opened`, only while not overdue.
    async fn mark_review_request_opened(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError>;

    /// `pending|opened -> expired` when overdue. Never touches completed requests.
    async fn expire_review_request(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError>;

    /// Sweep form of [`Store::expire_review_request`], at most `limit` rows.
    async fn expire_overdue_review_requests(
        &self,
        at: DateTime<Utc>,
        limit: i64,
        ctx: &AuditContext,
    ) -> Result<Vec<Change<ReviewRequest>>, AppError>;

    /// Removes the row. Customer counters are left as they are.
    async fn delete_review_request(
        &self,
        id: Uuid,
        ctx: &AuditContext,
    ) -> Result<Option<ReviewRequest>, AppError>;

    // --- feedback ---

    /// Completes the request (conditional on it still accepting feedback),
    /// inserts the feedback, and bumps the customer's feedback counters.
    async fn submit_feedback(
        &self,
        feedback: &Feedback,
        review_request_id: Uuid,
        ctx: &AuditContext,
    ) -> Result<FeedbackSubmission, AppError>;

    async fn find_feedback(&self, id: Uuid) -> Result<Option<Feedback>, AppError>;

    async fn feedback_for_review_request(
        &self,
        review_request_id: Uuid,
    ) -> Result<Vec<Feedback>, AppError>;

    async fn list_feedback(
        &self,
        business_id: Uuid,
        moderation_status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>, AppError>;

    async fn update_feedback(
        &self,
        id: Uuid,
        update: &FeedbackUpdate,
        now: DateTime<Utc>,
        ctx: &AuditContext,
    ) -> Result<Option<Change<Feedback>>, AppError>;

    // --- deferred dispatch queue ---

    /// Claims due tasks, including `processing` ones whose lease ran out.
    async fn claim_due_dispatch_tasks(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<DispatchTask>, AppError>;

    async fn complete_dispatch_task(&self, id: Uuid) -> Result<(), AppError>;

    /// Schedules a retry with backoff, or parks the task after
    /// [`MAX_DISPATCH_ATTEMPTS`].
    async fn fail_dispatch_task(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    // --- audit trail ---

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<(), AppError>;

    async fn audit_logs_for(
        &self,
        auditable_type: &str,
        auditable_id: Uuid,
    ) -> Result<Vec<AuditLog>, AppError>;
}
