//! Audit log model: an append-only record of one change to an auditable entity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Kind of change recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Updated,
    Deleted,
    Restored,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::Created => "created",
            AuditEvent::Updated => "updated",
            AuditEvent::Deleted => "deleted",
            AuditEvent::Restored => "restored",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an audit log row.
///
/// Value maps are JSON objects with sensitive fields already redacted. Rows are
/// never updated or deleted; the table rejects both with a trigger.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    /// `user`, `api_key` or `system`
    pub actor_type: String,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub auditable_type: String,
    pub auditable_id: Uuid,
    pub event: String,
    pub old_values: Value,
    pub new_values: Value,
    /// Changed attributes only, with their new values.
    pub changes: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}
