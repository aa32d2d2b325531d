//! In-process implementation of [`Store`], used by the integration tests and
//! for running the API without a database.
//!
//! One mutex guards all tables, so every operation is atomic in the same way a
//! PostgreSQL transaction is; guards are evaluated against the locked state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Change, DeliveryUpdate, FeedbackSubmission, MAX_DISPATCH_ATTEMPTS, Store, dispatch_backoff};
use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::api_key::ApiKey;
use crate::models::audit_log::AuditLog;
use crate::models::business::Business;
use crate::models::customer::Customer;
use crate::models::dispatch_task::DispatchTask;
use crate::models::feedback::{Feedback, FeedbackUpdate, ModerationStatus};
use crate::models::pagination::{Page, PageRequest};
use crate::models::review_request::{ReviewRequest, ReviewRequestFilter, Status};
use crate::models::user::User;

#[derive(Debug, Default)]
struct Tables {
    businesses: HashMap<Uuid, Business>,
    users: HashMap<Uuid, User>,
    api_keys: HashMap<Uuid, ApiKey>,
    customers: HashMap<Uuid, Customer>,
    review_requests: HashMap<Uuid, ReviewRequest>,
    feedback: HashMap<Uuid, Feedback>,
    dispatch_tasks: HashMap<Uuid, DispatchTask>,
    audit_logs: Vec<AuditLog>,
}

impl Tables {
    fn touch_last_request_sent(&mut self, customer_id: Uuid, at: DateTime<Utc>) {
        if let Some(customer) = self.customers.get_mut(&customer_id) {
            customer.last_request_sent_at = Some(latest(customer.last_request_sent_at, at));
        }
    }

    fn insert_task(&mut self, task: &DispatchTask) {
        self.dispatch_tasks.insert(task.id, task.clone());
    }
}

fn latest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    current.map_or(candidate, |current| current.max(candidate))
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let start = usize::try_from(page.offset()).unwrap_or(usize::MAX).min(items.len());
    let end = start
        .saturating_add(page.per_page as usize)
        .min(items.len());
    let items = items.drain(start..end).collect();
    Page {
        items,
        total,
        request: page,
    }
}

/// Store keeping every table in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_business(&self, id: Uuid) -> Result<Option<Business>, AppError> {
        Ok(self.tables.lock().await.businesses.get(&id).cloned())
    }

    async fn insert_business(
        &self,
        business: &Business,
        _ctx: &AuditContext,
    ) -> Result<Business, AppError> {
        let mut tables = self.tables.lock().await;
        tables.businesses.insert(business.id, business.clone());
        Ok(business.clone())
    }

    async fn insert_user(&self, user: &User, _ctx: &AuditContext) -> Result<User, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(AppError::field("email", "The email has already been taken."));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn active_api_keys(&self) -> Result<Vec<ApiKey>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .api_keys
            .values()
            .filter(|key| key.is_active)
            .cloned()
            .collect())
    }

    async fn insert_api_key(&self, key: &ApiKey, _ctx: &AuditContext) -> Result<ApiKey, AppError> {
        let mut tables = self.tables.lock().await;
        tables.api_keys.insert(key.id, key.clone());
        Ok(key.clone())
    }

    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ApiKey>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(key) = tables.api_keys.get_mut(&id).filter(|k| k.is_active != active) else {
            return Ok(None);
        };
        let before = key.clone();
        key.is_active = active;
        key.updated_at = Utc::now();
        Ok(Some(Change {
            before,
            after: key.clone(),
        }))
    }

    async fn record_api_key_usage(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if let Some(key) = tables.api_keys.get_mut(&id) {
            key.last_used_at = Some(latest(key.last_used_at, at));
            if let Some(ip) = ip {
                key.last_used_ip = Some(ip.to_string());
            }
        }
        Ok(())
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.tables.lock().await.customers.get(&id).cloned())
    }

    async fn first_or_create_customer(
        &self,
        customer: &Customer,
        _ctx: &AuditContext,
    ) -> Result<(Customer, bool), AppError> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .customers
            .values()
            .find(|c| c.business_id == customer.business_id && c.email == customer.email)
            .cloned();
        if let Some(existing) = existing {
            return Ok((existing, false));
        }
        tables.customers.insert(customer.id, customer.clone());
        Ok((customer.clone(), true))
    }

    async fn set_customer_opted_out(
        &self,
        id: Uuid,
        opted_out: bool,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<Customer>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(customer) = tables
            .customers
            .get_mut(&id)
            .filter(|c| c.opted_out != opted_out)
        else {
            return Ok(None);
        };
        let before = customer.clone();
        customer.opted_out = opted_out;
        customer.updated_at = Utc::now();
        Ok(Some(Change {
            before,
            after: customer.clone(),
        }))
    }

    async fn find_review_request(&self, id: Uuid) -> Result<Option<ReviewRequest>, AppError> {
        Ok(self.tables.lock().await.review_requests.get(&id).cloned())
    }

    async fn find_review_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReviewRequest>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .review_requests
            .values()
            .find(|r| r.unique_token == token)
            .cloned())
    }

    async fn list_review_requests(
        &self,
        business_id: Uuid,
        filter: ReviewRequestFilter,
        page: PageRequest,
    ) -> Result<Page<ReviewRequest>, AppError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<ReviewRequest> = tables
            .review_requests
            .values()
            .filter(|r| r.business_id == business_id)
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| filter.send_mode.is_none_or(|m| r.send_mode == m))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(items, page))
    }

    async fn create_review_request(
        &self,
        request: &ReviewRequest,
        task: Option<&DispatchTask>,
        _ctx: &AuditContext,
    ) -> Result<ReviewRequest, AppError> {
        let mut tables = self.tables.lock().await;
        let customer = tables
            .customers
            .get_mut(&request.customer_id)
            .filter(|c| c.business_id == request.business_id)
            .ok_or(AppError::Forbidden)?;
        if customer.opted_out {
            return Err(AppError::customer_opted_out());
        }

        let sent_at = request.sent_at.unwrap_or(request.created_at);
        customer.total_requests_sent += 1;
        customer.last_request_sent_at = Some(latest(customer.last_request_sent_at, sent_at));
        customer.updated_at = Utc::now();

        tables.review_requests.insert(request.id, request.clone());
        if let Some(task) = task {
            tables.insert_task(task);
        }
        Ok(request.clone())
    }

    async fn update_review_request_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(request) = tables.review_requests.get_mut(&id).filter(|r| {
            r.sent_at.is_none() && !r.is_expired(update.now)
        }) else {
            return Ok(None);
        };

        let before = request.clone();
        let plan = &update.plan;
        request.send_mode = plan.send_mode;
        request.is_scheduled = plan.is_scheduled;
        request.scheduled_at = plan.scheduled_at;
        request.sent_at = plan.sent_at;
        request.expires_at = plan.expires_at;
        request.updated_at = update.now;
        let after = request.clone();

        if let Some(sent_at) = after.sent_at {
            tables.touch_last_request_sent(after.customer_id, sent_at);
        }
        if let Some(task) = &update.task {
            tables.insert_task(task);
        }
        Ok(Some(Change { before, after }))
    }

    async fn mark_review_request_sent(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(request) = tables.review_requests.get_mut(&id).filter(|r| {
            r.sent_at.is_none()
                && r.scheduled_at == Some(scheduled_for)
                && r.status.is_open()
                && r.expires_at > sent_at
        }) else {
            return Ok(None);
        };

        let before = request.clone();
        request.sent_at = Some(sent_at);
        request.expires_at = expires_at;
        request.updated_at = sent_at;
        let after = request.clone();

        tables.touch_last_request_sent(after.customer_id, sent_at);
        Ok(Some(Change { before, after }))
    }

    async fn mark_review_request_opened(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(request) = tables
            .review_requests
            .get_mut(&id)
            .filter(|r| r.status == Status::Pending && r.expires_at > at)
        else {
            return Ok(None);
        };

        let before = request.clone();
        request.status = Status::Opened;
        request.opened_at = Some(at);
        request.updated_at = at;
        Ok(Some(Change {
            before,
            after: request.clone(),
        }))
    }

    async fn expire_review_request(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(request) = tables
            .review_requests
            .get_mut(&id)
            .filter(|r| r.is_overdue(at))
        else {
            return Ok(None);
        };

        let before = request.clone();
        request.status = Status::Expired;
        request.updated_at = at;
        Ok(Some(Change {
            before,
            after: request.clone(),
        }))
    }

    async fn expire_overdue_review_requests(
        &self,
        at: DateTime<Utc>,
        limit: i64,
        _ctx: &AuditContext,
    ) -> Result<Vec<Change<ReviewRequest>>, AppError> {
        let mut tables = self.tables.lock().await;
        let mut overdue: Vec<&mut ReviewRequest> = tables
            .review_requests
            .values_mut()
            .filter(|r| r.is_overdue(at))
            .collect();
        overdue.sort_by_key(|r| r.expires_at);

        let limit = usize::try_from(limit).unwrap_or(0);
        let changes = overdue
            .into_iter()
            .take(limit)
            .map(|request| {
                let before = request.clone();
                request.status = Status::Expired;
                request.updated_at = at;
                Change {
                    before,
                    after: request.clone(),
                }
            })
            .collect();
        Ok(changes)
    }

    async fn delete_review_request(
        &self,
        id: Uuid,
        _ctx: &AuditContext,
    ) -> Result<Option<ReviewRequest>, AppError> {
        let mut tables = self.tables.lock().await;
        let deleted = tables.review_requests.remove(&id);
        if deleted.is_some() {
            for feedback in tables.feedback.values_mut() {
                if feedback.review_request_id == Some(id) {
                    feedback.review_request_id = None;
                }
            }
        }
        Ok(deleted)
    }

    async fn submit_feedback(
        &self,
        feedback: &Feedback,
        review_request_id: Uuid,
        _ctx: &AuditContext,
    ) -> Result<FeedbackSubmission, AppError> {
        let now = feedback.submitted_at;
        let mut tables = self.tables.lock().await;
        let request = tables
            .review_requests
            .get_mut(&review_request_id)
            .ok_or(AppError::NotFound)?;
        request.ensure_accepts_feedback(now)?;

        let before = request.clone();
        request.status = Status::Completed;
        request.completed_at = Some(now);
        request.updated_at = now;
        let after = request.clone();

        tables.feedback.insert(feedback.id, feedback.clone());
        if let Some(customer) = feedback
            .customer_id
            .and_then(|id| tables.customers.get_mut(&id))
        {
            customer.total_feedbacks += 1;
            customer.last_feedback_at = Some(latest(customer.last_feedback_at, now));
            customer.updated_at = Utc::now();
        }

        Ok(FeedbackSubmission {
            feedback: feedback.clone(),
            request: Change { before, after },
        })
    }

    async fn find_feedback(&self, id: Uuid) -> Result<Option<Feedback>, AppError> {
        Ok(self.tables.lock().await.feedback.get(&id).cloned())
    }

    async fn feedback_for_review_request(
        &self,
        review_request_id: Uuid,
    ) -> Result<Vec<Feedback>, AppError> {
        let tables = self.tables.lock().await;
        let mut feedback: Vec<Feedback> = tables
            .feedback
            .values()
            .filter(|f| f.review_request_id == Some(review_request_id))
            .cloned()
            .collect();
        feedback.sort_by_key(|f| f.submitted_at);
        Ok(feedback)
    }

    async fn list_feedback(
        &self,
        business_id: Uuid,
        moderation_status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>, AppError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<Feedback> = tables
            .feedback
            .values()
            .filter(|f| f.business_id == business_id)
            .filter(|f| moderation_status.is_none_or(|s| f.moderation_status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
        Ok(paginate(items, page))
    }

    async fn update_feedback(
        &self,
        id: Uuid,
        update: &FeedbackUpdate,
        now: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<Feedback>>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(feedback) = tables.feedback.get_mut(&id) else {
            return Ok(None);
        };
        let before = feedback.clone();
        *feedback = update.apply(&before, now);
        Ok(Some(Change {
            before,
            after: feedback.clone(),
        }))
    }

    async fn claim_due_dispatch_tasks(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<DispatchTask>, AppError> {
        let mut tables = self.tables.lock().await;
        let lease_cutoff = now - lease;
        let mut due: Vec<&mut DispatchTask> = tables
            .dispatch_tasks
            .values_mut()
            .filter(|t| match t.status.as_str() {
                "pending" => t.available_at <= now,
                "processing" => t.claimed_at.is_some_and(|c| c <= lease_cutoff),
                _ => false,
            })
            .collect();
        due.sort_by_key(|t| t.available_at);

        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|task| {
                task.status = "processing".to_string();
                task.claimed_at = Some(now);
                task.attempts += 1;
                task.clone()
            })
            .collect())
    }

    async fn complete_dispatch_task(&self, id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if let Some(task) = tables.dispatch_tasks.get_mut(&id) {
            task.status = "completed".to_string();
            task.last_error = None;
        }
        Ok(())
    }

    async fn fail_dispatch_task(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if let Some(task) = tables.dispatch_tasks.get_mut(&id) {
            task.status = if task.attempts >= MAX_DISPATCH_ATTEMPTS {
                "failed".to_string()
            } else {
                "pending".to_string()
            };
            task.available_at = now + dispatch_backoff(task.attempts);
            task.last_error = Some(error.to_string());
            task.claimed_at = None;
        }
        Ok(())
    }

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<(), AppError> {
        self.tables.lock().await.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn audit_logs_for(
        &self,
        auditable_type: &str,
        auditable_id: Uuid,
    ) -> Result<Vec<AuditLog>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .audit_logs
            .iter()
            .filter(|log| log.auditable_type == auditable_type && log.auditable_id == auditable_id)
            .cloned()
            .collect())
    }
}
