//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Hands a validated command to a service function
//! 3. Returns HTTP response (JSON, status code)

use crate::audit::{AuditContext, RequestMeta};
use crate::policy::Principal;

/// Feedback moderation endpoints
pub mod feedback;

/// Service health endpoint
pub mod health;

/// Tokenized customer-facing links
pub mod public;

/// Review request endpoints
pub mod review_requests;

/// Audit context for a write made with an API key.
pub(crate) fn audit_context(principal: &Principal, meta: RequestMeta) -> AuditContext {
    AuditContext::new(principal.actor.clone(), Some(meta))
}
