//! Customer model and the inline customer payload accepted by review request creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A contact of one business.
///
/// `email` is unique within the business. The counters and `last_*_at`
/// timestamps are a denormalized ledger maintained by the store with atomic
/// increments and monotonic-max updates; application code never writes them.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub total_requests_sent: i32,
    pub total_feedbacks: i32,
    pub last_request_sent_at: Option<DateTime<Utc>>,
    pub last_feedback_at: Option<DateTime<Utc>>,
    /// Blocks new review requests. Existing requests are unaffected.
    pub opted_out: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(business_id: Uuid, details: NewCustomer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id,
            name: details.name,
            email: normalize_email(&details.email),
            phone: details.phone,
            company: details.company,
            tags: Vec::new(),
            notes: None,
            total_requests_sent: 0,
            total_feedbacks: 0,
            last_request_sent_at: None,
            last_feedback_at: None,
            opted_out: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Emails are compared case-insensitively within a business.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validated data for a customer created on the fly.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
}

/// Inline `customer` object of `POST /review-requests`.
#[derive(Debug, Deserialize, Validate)]
pub struct InlineCustomerPayload {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "must be a valid email address"))]
    pub email: Option<String>,

    #[validate(length(max = 50, message = "may not be greater than 50 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 255, message = "may not be greater than 255 characters"))]
    pub company: Option<String>,
}

/// Customer as embedded in API responses.
#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub tags: Vec<String>,
    pub total_requests_sent: i32,
    pub total_feedbacks: i32,
    pub last_request_sent_at: Option<DateTime<Utc>>,
    pub last_feedback_at: Option<DateTime<Utc>>,
    pub opted_out: bool,
}

impl From<Customer> for CustomerResponse {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            email: customer.email,
            phone: customer.phone,
            company: customer.company,
            tags: customer.tags,
            total_requests_sent: customer.total_requests_sent,
            total_feedbacks: customer.total_feedbacks,
            last_request_sent_at: customer.last_request_sent_at,
            last_feedback_at: customer.last_feedback_at,
            opted_out: customer.opted_out,
        }
    }
}
