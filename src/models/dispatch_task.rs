//! Deferred dispatch task: a durable "send review request R at time T" entry
//! consumed by the background worker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a row of the `dispatch_tasks` table.
///
/// `scheduled_for` is compared against the request's `scheduled_at` when the task
/// fires, so a task left behind by a reschedule no-ops.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DispatchTask {
    pub id: Uuid,
    pub review_request_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    /// Earliest time of the next attempt.
    pub available_at: DateTime<Utc>,
    /// `pending`, `processing`, `completed` or `failed`
    pub status: String,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DispatchTask {
    pub fn new(review_request_id: Uuid, scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            review_request_id,
            scheduled_for,
            available_at: scheduled_for,
            status: "pending".to_string(),
            attempts: 0,
            claimed_at: None,
            last_error: None,
            created_at: now,
        }
    }
}
