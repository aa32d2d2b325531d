//! Audit trail.
//!
//! Entities opt in by implementing [`Auditable`]. The [`AuditedStore`] decorator
//! wraps the store's write path and turns each successful write into an
//! [`AuditLog`] built by the functions below:
//!
//! - create: old values empty, new values = every recorded attribute
//! - update: only attributes whose value changed; nothing is written when none did
//! - delete: old values = every recorded attribute, new values empty
//!
//! Timestamps and session tokens are never recorded. Secrets are replaced by
//! [`REDACTED`] in every value map, whatever the entity.

mod store;

pub use store::AuditedStore;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::api_key::ApiKey;
use crate::models::audit_log::{AuditEvent, AuditLog};
use crate::models::business::Business;
use crate::models::customer::Customer;
use crate::models::feedback::Feedback;
use crate::models::review_request::ReviewRequest;
use crate::models::user::User;
use crate::repositories::Change;

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "password_hash",
    "password_confirmation",
    "remember_token",
    "key_hash",
    "secret",
    "api_key",
    "token",
    "unique_token",
];

const EXCLUDED_FIELDS: &[&str] = &["created_at", "updated_at", "remember_token"];

/// An entity whose writes are recorded.
pub trait Auditable: Serialize {
    const AUDITABLE_TYPE: &'static str;

    fn auditable_id(&self) -> Uuid;
}

impl Auditable for Business {
    const AUDITABLE_TYPE: &'static str = "business";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

impl Auditable for User {
    const AUDITABLE_TYPE: &'static str = "user";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

impl Auditable for Customer {
    const AUDITABLE_TYPE: &'static str = "customer";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

impl Auditable for ReviewRequest {
    const AUDITABLE_TYPE: &'static str = "review_request";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

impl Auditable for Feedback {
    const AUDITABLE_TYPE: &'static str = "feedback";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

impl Auditable for ApiKey {
    const AUDITABLE_TYPE: &'static str = "api_key";

    fn auditable_id(&self) -> Uuid {
        self.id
    }
}

/// Who performed a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Background workers, CLI commands, unauthenticated customer actions.
    System,
    User { id: Uuid, email: String },
    ApiKey { id: Uuid, name: String },
}

/// HTTP request details captured when a write happens inside a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
}

/// Passed explicitly to every store write.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub actor: Actor,
    pub request: Option<RequestMeta>,
    pub tags: Vec<String>,
}

impl AuditContext {
    /// Non-interactive context: no actor, no request metadata.
    pub fn system() -> Self {
        Self {
            actor: Actor::System,
            request: None,
            tags: Vec::new(),
        }
    }

    pub fn new(actor: Actor, request: Option<RequestMeta>) -> Self {
        Self {
            actor,
            request,
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Entry for a newly persisted entity.
pub fn created_entry<T: Auditable>(entity: &T, ctx: &AuditContext) -> AuditLog {
    let new_values = redact(snapshot(entity));
    entry::<T>(
        entity.auditable_id(),
        AuditEvent::Created,
        Map::new(),
        new_values.clone(),
        new_values,
        ctx,
    )
}

/// Entry for an update, or `None` when no recorded attribute changed.
pub fn updated_entry<T: Auditable>(change: &Change<T>, ctx: &AuditContext) -> Option<AuditLog> {
    changed_entry(change, AuditEvent::Updated, ctx)
}

/// Entry for a soft-deleted entity brought back into use.
pub fn restored_entry<T: Auditable>(change: &Change<T>, ctx: &AuditContext) -> Option<AuditLog> {
    changed_entry(change, AuditEvent::Restored, ctx)
}

/// Entry for a removed entity.
pub fn deleted_entry<T: Auditable>(entity: &T, ctx: &AuditContext) -> AuditLog {
    entry::<T>(
        entity.auditable_id(),
        AuditEvent::Deleted,
        redact(snapshot(entity)),
        Map::new(),
        Map::new(),
        ctx,
    )
}

fn changed_entry<T: Auditable>(
    change: &Change<T>,
    event: AuditEvent,
    ctx: &AuditContext,
) -> Option<AuditLog> {
    let before = snapshot(&change.before);
    let after = snapshot(&change.after);

    let mut old_values = Map::new();
    let mut new_values = Map::new();
    for (key, new_value) in &after {
        let old_value = before.get(key).unwrap_or(&Value::Null);
        if old_value != new_value {
            old_values.insert(key.clone(), old_value.clone());
            new_values.insert(key.clone(), new_value.clone());
        }
    }
    if new_values.is_empty() {
        return None;
    }

    let new_values = redact(new_values);
    Some(entry::<T>(
        change.after.auditable_id(),
        event,
        redact(old_values),
        new_values.clone(),
        new_values,
        ctx,
    ))
}

/// Serialized attributes minus excluded fields.
fn snapshot<T: Auditable>(entity: &T) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(mut map)) => {
            for field in EXCLUDED_FIELDS {
                map.remove(*field);
            }
            map
        }
        Ok(_) | Err(_) => {
            tracing::warn!(
                auditable_type = T::AUDITABLE_TYPE,
                "entity did not serialize to an object; recording no attributes"
            );
            Map::new()
        }
    }
}

fn redact(mut values: Map<String, Value>) -> Map<String, Value> {
    for field in SENSITIVE_FIELDS {
        if let Some(value) = values.get_mut(*field) {
            *value = Value::String(REDACTED.to_string());
        }
    }
    values
}

fn entry<T: Auditable>(
    auditable_id: Uuid,
    event: AuditEvent,
    old_values: Map<String, Value>,
    new_values: Map<String, Value>,
    changes: Map<String, Value>,
    ctx: &AuditContext,
) -> AuditLog {
    let (actor_type, user_id, user_email) = match &ctx.actor {
        Actor::System => ("system", None, None),
        Actor::User { id, email } => ("user", Some(*id), Some(email.clone())),
        Actor::ApiKey { .. } => ("api_key", None, None),
    };

    let mut tags = ctx.tags.clone();
    if let Actor::ApiKey { id, .. } = &ctx.actor {
        tags.push(format!("api_key:{id}"));
    }

    let request = ctx.request.clone().unwrap_or_default();

    AuditLog {
        id: Uuid::new_v4(),
        actor_type: actor_type.to_string(),
        user_id,
        user_email,
        auditable_type: T::AUDITABLE_TYPE.to_string(),
        auditable_id,
        event: event.to_string(),
        old_values: Value::Object(old_values),
        new_values: Value::Object(new_values),
        changes: Value::Object(changes),
        ip_address: request.ip,
        user_agent: request.user_agent,
        url: request.url,
        method: request.method,
        tags,
        created_at: Utc::now(),
    }
}
