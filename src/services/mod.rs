//! Business logic services.
//!
//! Services contain the core logic separated from HTTP handlers. They take the
//! acting principal and audit context explicitly; nothing is read from ambient state.

pub mod api_key_service;
pub mod feedback_service;
pub mod public_link_service;
pub mod review_request_service;
