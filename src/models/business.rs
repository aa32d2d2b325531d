//! Business (tenant) model.
//!
//! A business is the tenant boundary: customers, review requests, feedback and
//! API keys all belong to exactly one business.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a business record from the database.
///
/// Businesses are deactivated (`is_active = false`), never hard-deleted.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    /// Address notified when new feedback arrives.
    pub email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    /// Subscription plan reference, managed by the billing provider.
    pub plan: Option<String>,
    pub is_active: bool,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    pub fn new(name: String, email: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            phone: None,
            website: None,
            address: None,
            plan: None,
            is_active: true,
            onboarded_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }
}
