//! Operator account model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A person who signs in to manage a business.
///
/// Only the argon2 hash of the password is stored. The audit trail redacts it anyway.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub business_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub remember_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
