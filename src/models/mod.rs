//! Data models representing database entities, plus the request and response
//! types of the endpoints that expose them.

pub mod api_key;
pub mod audit_log;
pub mod business;
pub mod customer;
pub mod dispatch_task;
pub mod feedback;
pub mod pagination;
pub mod review_request;
pub mod user;

/// A stored enum column held a value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);
