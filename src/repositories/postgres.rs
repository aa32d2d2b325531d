//! PostgreSQL implementation of [`Store`].
//!
//! # Atomicity Guarantees
//!
//! Every multi-row effect runs inside one PostgreSQL transaction. Rows whose
//! before image is needed for the audit trail are locked with `FOR UPDATE`
//! first; the following `UPDATE` repeats the guard in its `WHERE` clause so a
//! transition never applies to a row that no longer qualifies.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{Change, DeliveryUpdate, FeedbackSubmission, MAX_DISPATCH_ATTEMPTS, Store, dispatch_backoff};
use crate::audit::AuditContext;
use crate::db::DbPool;
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

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn lock_review_request(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<ReviewRequest>, AppError> {
    let request = sqlx::query_as::<_, ReviewRequest>(
        "SELECT * FROM review_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(request)
}

/// Monotonic-max update of `last_request_sent_at`. Never touches the counter.
async fn touch_last_request_sent(
    tx: &mut Transaction<'_, Postgres>,
    customer_id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE customers
        SET last_request_sent_at = GREATEST(COALESCE(last_request_sent_at, $2), $2)
        WHERE id = $1
        "#,
    )
    .bind(customer_id)
    .bind(at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_dispatch_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &DispatchTask,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO dispatch_tasks (
            id, review_request_id, scheduled_for, available_at, status, attempts, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(task.id)
    .bind(task.review_request_id)
    .bind(task.scheduled_for)
    .bind(task.available_at)
    .bind(&task.status)
    .bind(task.attempts)
    .bind(task.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_business(&self, id: Uuid) -> Result<Option<Business>, AppError> {
        let business = sqlx::query_as::<_, Business>("SELECT * FROM businesses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(business)
    }

    async fn insert_business(
        &self,
        business: &Business,
        _ctx: &AuditContext,
    ) -> Result<Business, AppError> {
        let stored = sqlx::query_as::<_, Business>(
            r#"
            INSERT INTO businesses (
                id, name, email, phone, website, address, plan,
                is_active, onboarded_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(business.id)
        .bind(&business.name)
        .bind(&business.email)
        .bind(&business.phone)
        .bind(&business.website)
        .bind(&business.address)
        .bind(&business.plan)
        .bind(business.is_active)
        .bind(business.onboarded_at)
        .bind(business.created_at)
        .bind(business.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn insert_user(&self, user: &User, _ctx: &AuditContext) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                id, business_id, name, email, password_hash, remember_token, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(user.business_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.remember_token)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::field("email", "The email has already been taken.")
            } else {
                AppError::Database(e)
            }
        })
    }

    async fn active_api_keys(&self) -> Result<Vec<ApiKey>, AppError> {
        let keys = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE is_active = true")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    async fn insert_api_key(&self, key: &ApiKey, _ctx: &AuditContext) -> Result<ApiKey, AppError> {
        let stored = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (
                id, business_id, name, key_hash, key_preview, permissions,
                is_active, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(key.id)
        .bind(key.business_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_preview)
        .bind(&key.permissions)
        .bind(key.is_active)
        .bind(key.expires_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ApiKey>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let before =
            sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(before) = before.filter(|key| key.is_active != active) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let after = sqlx::query_as::<_, ApiKey>(
            "UPDATE api_keys SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Change { before, after }))
    }

    async fn record_api_key_usage(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET last_used_at = GREATEST(COALESCE(last_used_at, $2), $2),
                last_used_ip = COALESCE($3, last_used_ip)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn first_or_create_customer(
        &self,
        customer: &Customer,
        _ctx: &AuditContext,
    ) -> Result<(Customer, bool), AppError> {
        // ON CONFLICT keeps concurrent upserts of the same email from failing
        let inserted = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (
                id, business_id, name, email, phone, company, tags, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (business_id, email) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(customer.id)
        .bind(customer.business_id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.company)
        .bind(&customer.tags)
        .bind(&customer.notes)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = inserted {
            return Ok((created, true));
        }

        let existing = sqlx::query_as::<_, Customer>(
            "SELECT * FROM customers WHERE business_id = $1 AND email = $2",
        )
        .bind(customer.business_id)
        .bind(&customer.email)
        .fetch_one(&self.pool)
        .await?;
        Ok((existing, false))
    }

    async fn set_customer_opted_out(
        &self,
        id: Uuid,
        opted_out: bool,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<Customer>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let before =
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(before) = before.filter(|c| c.opted_out != opted_out) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let after = sqlx::query_as::<_, Customer>(
            "UPDATE customers SET opted_out = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(opted_out)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Change { before, after }))
    }

    async fn find_review_request(&self, id: Uuid) -> Result<Option<ReviewRequest>, AppError> {
        let request =
            sqlx::query_as::<_, ReviewRequest>("SELECT * FROM review_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(request)
    }

    async fn find_review_request_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReviewRequest>, AppError> {
        let request = sqlx::query_as::<_, ReviewRequest>(
            "SELECT * FROM review_requests WHERE unique_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    async fn list_review_requests(
        &self,
        business_id: Uuid,
        filter: ReviewRequestFilter,
        page: PageRequest,
    ) -> Result<Page<ReviewRequest>, AppError> {
        let status = filter.status.map(|s| s.as_str());
        let send_mode = filter.send_mode.map(|m| m.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM review_requests
            WHERE business_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR send_mode = $3)
            "#,
        )
        .bind(business_id)
        .bind(status)
        .bind(send_mode)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, ReviewRequest>(
            r#"
            SELECT * FROM review_requests
            WHERE business_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR send_mode = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(business_id)
        .bind(status)
        .bind(send_mode)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    /// # Process
    ///
    /// 1. Lock the customer row and re-check `opted_out`
    /// 2. Insert the review request
    /// 3. Increment `total_requests_sent` in place
    /// 4. Enqueue the deferred dispatch task, if any
    /// 5. Commit (or rollback on error)
    async fn create_review_request(
        &self,
        request: &ReviewRequest,
        task: Option<&DispatchTask>,
        _ctx: &AuditContext,
    ) -> Result<ReviewRequest, AppError> {
        let mut tx = self.pool.begin().await?;

        let opted_out: bool = sqlx::query_scalar(
            "SELECT opted_out FROM customers WHERE id = $1 AND business_id = $2 FOR UPDATE",
        )
        .bind(request.customer_id)
        .bind(request.business_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::Forbidden)?;

        if opted_out {
            tx.rollback().await?;
            return Err(AppError::customer_opted_out());
        }

        let stored = sqlx::query_as::<_, ReviewRequest>(
            r#"
            INSERT INTO review_requests (
                id, business_id, customer_id, unique_token, subject, message,
                send_mode, is_scheduled, scheduled_at, sent_at, opened_at, completed_at,
                expires_at, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.business_id)
        .bind(request.customer_id)
        .bind(&request.unique_token)
        .bind(&request.subject)
        .bind(&request.message)
        .bind(request.send_mode.as_str())
        .bind(request.is_scheduled)
        .bind(request.scheduled_at)
        .bind(request.sent_at)
        .bind(request.opened_at)
        .bind(request.completed_at)
        .bind(request.expires_at)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        // Deferred sends bump this again when they actually go out
        let sent_at = stored.sent_at.unwrap_or(stored.created_at);
        sqlx::query(
            r#"
            UPDATE customers
            SET total_requests_sent = total_requests_sent + 1,
                last_request_sent_at = GREATEST(COALESCE(last_request_sent_at, $2), $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(stored.customer_id)
        .bind(sent_at)
        .execute(&mut *tx)
        .await?;

        if let Some(task) = task {
            insert_dispatch_task(&mut tx, task).await?;
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn update_review_request_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let before = lock_review_request(&mut tx, id).await?.filter(|r| {
            r.sent_at.is_none() && !r.is_expired(update.now)
        });
        let Some(before) = before else {
            tx.rollback().await?;
            return Ok(None);
        };

        let plan = &update.plan;
        let after = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET send_mode = $2,
                is_scheduled = $3,
                scheduled_at = $4,
                sent_at = $5,
                expires_at = $6,
                updated_at = $7
            WHERE id = $1 AND sent_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(plan.send_mode.as_str())
        .bind(plan.is_scheduled)
        .bind(plan.scheduled_at)
        .bind(plan.sent_at)
        .bind(plan.expires_at)
        .bind(update.now)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(sent_at) = after.sent_at {
            touch_last_request_sent(&mut tx, after.customer_id, sent_at).await?;
        }
        if let Some(task) = &update.task {
            insert_dispatch_task(&mut tx, task).await?;
        }

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_review_request(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let after = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET sent_at = $3, expires_at = $4, updated_at = $3
            WHERE id = $1
              AND sent_at IS NULL
              AND scheduled_at = $2
              AND status IN ('pending', 'opened')
              AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(scheduled_for)
        .bind(sent_at)
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(after) = after else {
            tx.rollback().await?;
            return Ok(None);
        };

        touch_last_request_sent(&mut tx, after.customer_id, sent_at).await?;
        tx.commit().await?;
        Ok(Some(Change { before, after }))
    }

    async fn mark_review_request_opened(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_review_request(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let after = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET status = 'opened', opened_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending' AND expires_at > $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(after.map(|after| Change { before, after }))
    }

    async fn expire_review_request(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<ReviewRequest>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_review_request(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        // completed wins: the guard excludes it
        let after = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET status = 'expired', updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'opened') AND expires_at <= $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(after.map(|after| Change { before, after }))
    }

    async fn expire_overdue_review_requests(
        &self,
        at: DateTime<Utc>,
        limit: i64,
        _ctx: &AuditContext,
    ) -> Result<Vec<Change<ReviewRequest>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let overdue = sqlx::query_as::<_, ReviewRequest>(
            r#"
            SELECT * FROM review_requests
            WHERE status IN ('pending', 'opened') AND expires_at <= $1
            ORDER BY expires_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(at)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if overdue.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = overdue.iter().map(|r| r.id).collect();
        let expired = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET status = 'expired', updated_at = $2
            WHERE id = ANY($1) AND status IN ('pending', 'opened') AND expires_at <= $2
            RETURNING *
            "#,
        )
        .bind(&ids)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let changes = overdue
            .into_iter()
            .filter_map(|before| {
                expired
                    .iter()
                    .find(|after| after.id == before.id)
                    .cloned()
                    .map(|after| Change { before, after })
            })
            .collect();
        Ok(changes)
    }

    async fn delete_review_request(
        &self,
        id: Uuid,
        _ctx: &AuditContext,
    ) -> Result<Option<ReviewRequest>, AppError> {
        let deleted = sqlx::query_as::<_, ReviewRequest>(
            "DELETE FROM review_requests WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(deleted)
    }

    /// # Process
    ///
    /// 1. Lock the review request and check it still accepts feedback
    /// 2. Mark it `completed` with a guarded update
    /// 3. Insert the feedback
    /// 4. Increment the customer's `total_feedbacks` in place
    /// 5. Commit (or rollback on error)
    async fn submit_feedback(
        &self,
        feedback: &Feedback,
        review_request_id: Uuid,
        _ctx: &AuditContext,
    ) -> Result<FeedbackSubmission, AppError> {
        let now = feedback.submitted_at;
        let mut tx = self.pool.begin().await?;

        let before = lock_review_request(&mut tx, review_request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if let Err(rule) = before.ensure_accepts_feedback(now) {
            tx.rollback().await?;
            return Err(rule);
        }

        let after = sqlx::query_as::<_, ReviewRequest>(
            r#"
            UPDATE review_requests
            SET status = 'completed', completed_at = $2, updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'opened') AND expires_at > $2
            RETURNING *
            "#,
        )
        .bind(review_request_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let stored = sqlx::query_as::<_, Feedback>(
            r#"
            INSERT INTO feedback (
                id, business_id, customer_id, review_request_id, rating, comment, sentiment,
                moderation_status, is_public, reply, replied_at, submitted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(feedback.id)
        .bind(feedback.business_id)
        .bind(feedback.customer_id)
        .bind(feedback.review_request_id)
        .bind(feedback.rating)
        .bind(&feedback.comment)
        .bind(&feedback.sentiment)
        .bind(feedback.moderation_status.as_str())
        .bind(feedback.is_public)
        .bind(&feedback.reply)
        .bind(feedback.replied_at)
        .bind(feedback.submitted_at)
        .bind(feedback.created_at)
        .bind(feedback.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(customer_id) = stored.customer_id {
            sqlx::query(
                r#"
                UPDATE customers
                SET total_feedbacks = total_feedbacks + 1,
                    last_feedback_at = GREATEST(COALESCE(last_feedback_at, $2), $2),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(customer_id)
            .bind(stored.submitted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(FeedbackSubmission {
            feedback: stored,
            request: Change { before, after },
        })
    }

    async fn find_feedback(&self, id: Uuid) -> Result<Option<Feedback>, AppError> {
        let feedback = sqlx::query_as::<_, Feedback>("SELECT * FROM feedback WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feedback)
    }

    async fn feedback_for_review_request(
        &self,
        review_request_id: Uuid,
    ) -> Result<Vec<Feedback>, AppError> {
        let feedback = sqlx::query_as::<_, Feedback>(
            "SELECT * FROM feedback WHERE review_request_id = $1 ORDER BY submitted_at",
        )
        .bind(review_request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feedback)
    }

    async fn list_feedback(
        &self,
        business_id: Uuid,
        moderation_status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>, AppError> {
        let status = moderation_status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM feedback
            WHERE business_id = $1 AND ($2::text IS NULL OR moderation_status = $2)
            "#,
        )
        .bind(business_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Feedback>(
            r#"
            SELECT * FROM feedback
            WHERE business_id = $1 AND ($2::text IS NULL OR moderation_status = $2)
            ORDER BY submitted_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(business_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn update_feedback(
        &self,
        id: Uuid,
        update: &FeedbackUpdate,
        now: DateTime<Utc>,
        _ctx: &AuditContext,
    ) -> Result<Option<Change<Feedback>>, AppError> {
        let mut tx = self.pool.begin().await?;

        let before = sqlx::query_as::<_, Feedback>("SELECT * FROM feedback WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(before) = before else {
            tx.rollback().await?;
            return Ok(None);
        };

        let next = update.apply(&before, now);
        let after = sqlx::query_as::<_, Feedback>(
            r#"
            UPDATE feedback
            SET moderation_status = $2,
                is_public = $3,
                reply = $4,
                replied_at = $5,
                comment = $6,
                updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next.moderation_status.as_str())
        .bind(next.is_public)
        .bind(&next.reply)
        .bind(next.replied_at)
        .bind(&next.comment)
        .bind(next.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Change { before, after }))
    }

    /// Claims with `FOR UPDATE SKIP LOCKED` so that several workers never pick
    /// the same task. A `processing` task whose lease ran out is claimed again.
    async fn claim_due_dispatch_tasks(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<DispatchTask>, AppError> {
        let tasks = sqlx::query_as::<_, DispatchTask>(
            r#"
            UPDATE dispatch_tasks
            SET status = 'processing', claimed_at = $1, attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM dispatch_tasks
                WHERE (status = 'pending' AND available_at <= $1)
                   OR (status = 'processing' AND claimed_at <= $2)
                ORDER BY available_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now - lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn complete_dispatch_task(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE dispatch_tasks SET status = 'completed', last_error = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_dispatch_task(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let attempts: Option<i32> =
            sqlx::query_scalar("SELECT attempts FROM dispatch_tasks WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(());
        };

        let status = if attempts >= MAX_DISPATCH_ATTEMPTS {
            "failed"
        } else {
            "pending"
        };
        sqlx::query(
            r#"
            UPDATE dispatch_tasks
            SET status = $2, available_at = $3, last_error = $4, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(now + dispatch_backoff(attempts))
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_type, user_id, user_email, auditable_type, auditable_id, event,
                old_values, new_values, changes, ip_address, user_agent, url, method, tags,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.actor_type)
        .bind(entry.user_id)
        .bind(&entry.user_email)
        .bind(&entry.auditable_type)
        .bind(entry.auditable_id)
        .bind(&entry.event)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.changes)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.url)
        .bind(&entry.method)
        .bind(&entry.tags)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_logs_for(
        &self,
        auditable_type: &str,
        auditable_id: Uuid,
    ) -> Result<Vec<AuditLog>, AppError> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_logs
            WHERE auditable_type = $1 AND auditable_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(auditable_type)
        .bind(auditable_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
