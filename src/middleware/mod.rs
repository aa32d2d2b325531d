//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Authenticate requests
//! - Capture request context for the audit trail
//! - Short-circuit requests (reject unauthenticated)

/// API key authentication middleware
pub mod auth;

/// Request metadata capture
pub mod request_meta;
