//! Review request model: the solicitation sent to one customer, its lifecycle
//! states, delivery planning, and the API request/response types.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──open──▶ opened ──feedback──▶ completed
//!    │                 │
//!    └──────expiry─────┴──────────────▶ expired
//! ```
//!
//! `completed` is terminal and wins over expiry. `sent_at` is written at most once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::UnknownVariant;
use crate::models::customer::{CustomerResponse, InlineCustomerPayload, NewCustomer};
use crate::models::feedback::FeedbackResponse;
use crate::validation::Errors;

/// Upper bound of `schedule_hours`: 30 days.
pub const MAX_SCHEDULE_HOURS: i64 = 720;

/// How a review request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    Now,
    Scheduled,
    Manual,
}

impl SendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SendMode::Now => "now",
            SendMode::Scheduled => "scheduled",
            SendMode::Manual => "manual",
        }
    }
}

impl FromStr for SendMode {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "now" => Ok(SendMode::Now),
            "scheduled" => Ok(SendMode::Scheduled),
            "manual" => Ok(SendMode::Manual),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl TryFrom<String> for SendMode {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer-facing state of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Opened,
    Completed,
    Expired,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Opened => "opened",
            Status::Completed => "completed",
            Status::Expired => "expired",
        }
    }

    /// Transitions only move forward; nothing leaves `completed` or `expired`.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Opened)
                | (Status::Pending, Status::Completed)
                | (Status::Opened, Status::Completed)
                | (Status::Pending, Status::Expired)
                | (Status::Opened, Status::Expired)
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, Status::Pending | Status::Opened)
    }
}

impl FromStr for Status {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Status::Pending),
            "opened" => Ok(Status::Opened),
            "completed" => Ok(Status::Completed),
            "expired" => Ok(Status::Expired),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl TryFrom<String> for Status {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a review request record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ReviewRequest {
    pub id: Uuid,
    pub business_id: Uuid,
    pub customer_id: Uuid,

    /// Unguessable token of the public link. Sole authorization of the customer.
    pub unique_token: String,

    pub subject: String,
    pub message: String,

    #[sqlx(try_from = "String")]
    pub send_mode: SendMode,

    /// Historical flag: stays true after a scheduled request has been sent.
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Set at most once.
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,

    #[sqlx(try_from = "String")]
    pub status: Status,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewRequest {
    pub fn new(
        business_id: Uuid,
        customer_id: Uuid,
        subject: String,
        message: String,
        unique_token: String,
        plan: &DeliveryPlan,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id,
            customer_id,
            unique_token,
            subject,
            message,
            send_mode: plan.send_mode,
            is_scheduled: plan.is_scheduled,
            scheduled_at: plan.scheduled_at,
            sent_at: plan.sent_at,
            opened_at: None,
            completed_at: None,
            expires_at: plan.expires_at,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Open (pending or opened) and past its expiry, whether or not the sweep has run yet.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at <= now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Expired || self.is_overdue(now)
    }

    /// Schedule changes are only allowed before delivery.
    pub fn ensure_unsent(&self) -> Result<(), AppError> {
        if self.sent_at.is_some() {
            return Err(AppError::BusinessRule(
                "This review request has already been sent".to_string(),
            ));
        }
        Ok(())
    }

    /// Precondition of the operator "send now" and reschedule actions.
    pub fn ensure_sendable(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_unsent()?;
        if self.is_expired(now) {
            return Err(AppError::BusinessRule(
                "This review request has expired".to_string(),
            ));
        }
        Ok(())
    }

    /// Precondition of a customer feedback submission.
    pub fn ensure_accepts_feedback(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        match self.status {
            Status::Completed => Err(AppError::BusinessRule(
                "Feedback has already been submitted for this request".to_string(),
            )),
            _ if self.is_expired(now) => Err(AppError::BusinessRule(
                "This review request has expired".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Validated delivery choice of a create or update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Now,
    Scheduled { hours: i64 },
    Manual,
}

impl Delivery {
    pub fn send_mode(self) -> SendMode {
        match self {
            Delivery::Now => SendMode::Now,
            Delivery::Scheduled { .. } => SendMode::Scheduled,
            Delivery::Manual => SendMode::Manual,
        }
    }

    /// Reads `send_mode` / `schedule_hours`, recording problems into `errors`.
    fn parse(errors: &mut Errors, send_mode: Option<&str>, schedule_hours: Option<i64>) -> Option<Self> {
        let mode = errors.require("send_mode", send_mode)?;
        match mode.parse::<SendMode>() {
            Ok(SendMode::Now) => Some(Delivery::Now),
            Ok(SendMode::Manual) => Some(Delivery::Manual),
            Ok(SendMode::Scheduled) => {
                let hours = errors.require("schedule_hours", schedule_hours)?;
                // range errors were already recorded by the declarative rules
                (1..=MAX_SCHEDULE_HOURS)
                    .contains(&hours)
                    .then_some(Delivery::Scheduled { hours })
            }
            Err(_) => {
                errors.add(
                    "send_mode",
                    "The selected send mode is invalid. Use now, scheduled or manual.",
                );
                None
            }
        }
    }
}

/// Delivery-related columns computed for a new or rescheduled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub send_mode: SendMode,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl DeliveryPlan {
    /// Expiry is anchored at the (planned) delivery time.
    pub fn for_delivery(delivery: Delivery, now: DateTime<Utc>, ttl: Duration) -> Self {
        match delivery {
            Delivery::Now => Self::sent_at(now, ttl),
            Delivery::Scheduled { hours } => {
                let scheduled_at = now + Duration::hours(hours);
                Self {
                    send_mode: SendMode::Scheduled,
                    is_scheduled: true,
                    scheduled_at: Some(scheduled_at),
                    sent_at: None,
                    expires_at: scheduled_at + ttl,
                }
            }
            Delivery::Manual => Self {
                send_mode: SendMode::Manual,
                is_scheduled: false,
                scheduled_at: None,
                sent_at: None,
                expires_at: now + ttl,
            },
        }
    }

    /// Immediate delivery, also used by the "send now" action.
    pub fn sent_at(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            send_mode: SendMode::Now,
            is_scheduled: false,
            scheduled_at: None,
            sent_at: Some(now),
            expires_at: now + ttl,
        }
    }

    /// Time a deferred dispatch task must fire, if any.
    pub fn deferred_until(&self) -> Option<DateTime<Utc>> {
        match self.sent_at {
            Some(_) => None,
            None => self.scheduled_at,
        }
    }
}

/// Body of `POST /review-requests`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateReviewRequestPayload {
    pub customer_id: Option<Uuid>,

    #[validate(nested)]
    pub customer: Option<InlineCustomerPayload>,

    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub subject: Option<String>,

    #[validate(length(min = 1, max = 5000, message = "must be between 1 and 5000 characters"))]
    pub message: Option<String>,

    pub send_mode: Option<String>,

    #[validate(range(min = 1, max = 720, message = "must be between 1 and 720"))]
    pub schedule_hours: Option<i64>,
}

/// Who the request is for.
#[derive(Debug, Clone)]
pub enum CustomerTarget {
    Existing(Uuid),
    Inline(NewCustomer),
}

/// Validated `POST /review-requests`.
#[derive(Debug, Clone)]
pub struct CreateReviewRequest {
    pub customer: CustomerTarget,
    pub subject: String,
    pub message: String,
    pub delivery: Delivery,
}

impl CreateReviewRequestPayload {
    pub fn into_command(self) -> Result<CreateReviewRequest, AppError> {
        let mut errors = Errors::validate(&self);

        let customer = match (self.customer_id, self.customer) {
            (Some(id), _) => Some(CustomerTarget::Existing(id)),
            (None, Some(inline)) => {
                let name = errors.require("customer.name", inline.name);
                let email = errors.require("customer.email", inline.email);
                match (name, email) {
                    (Some(name), Some(email)) => Some(CustomerTarget::Inline(NewCustomer {
                        name,
                        email,
                        phone: inline.phone,
                        company: inline.company,
                    })),
                    _ => None,
                }
            }
            (None, None) => {
                errors.add(
                    "customer_id",
                    "The customer id field is required when customer is not present.",
                );
                None
            }
        };

        let subject = errors.require("subject", self.subject);
        let message = errors.require("message", self.message);
        let delivery = Delivery::parse(&mut errors, self.send_mode.as_deref(), self.schedule_hours);

        match (customer, subject, message, delivery) {
            (Some(customer), Some(subject), Some(message), Some(delivery)) => {
                errors.finish(|| CreateReviewRequest {
                    customer,
                    subject,
                    message,
                    delivery,
                })
            }
            _ => Err(errors.into_error()),
        }
    }
}

/// Body of `PUT /review-requests/{id}`.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReviewRequestPayload {
    pub send_mode: Option<String>,

    #[validate(range(min = 1, max = 720, message = "must be between 1 and 720"))]
    pub schedule_hours: Option<i64>,
}

impl UpdateReviewRequestPayload {
    pub fn into_delivery(self) -> Result<Delivery, AppError> {
        let mut errors = Errors::validate(&self);
        let delivery = Delivery::parse(&mut errors, self.send_mode.as_deref(), self.schedule_hours);
        match delivery {
            Some(delivery) => errors.finish(|| delivery),
            None => Err(errors.into_error()),
        }
    }
}

/// Query string of `GET /review-requests`.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequestQuery {
    pub status: Option<String>,
    pub send_mode: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Typed list filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewRequestFilter {
    pub status: Option<Status>,
    pub send_mode: Option<SendMode>,
}

impl ReviewRequestQuery {
    pub fn filter(&self) -> Result<ReviewRequestFilter, AppError> {
        let mut errors = Errors::default();
        let status = match self.status.as_deref() {
            None => None,
            Some(value) => value
                .parse::<Status>()
                .map_err(|_| errors.add("status", "The selected status is invalid."))
                .ok(),
        };
        let send_mode = match self.send_mode.as_deref() {
            None => None,
            Some(value) => value
                .parse::<SendMode>()
                .map_err(|_| errors.add("send_mode", "The selected send mode is invalid."))
                .ok(),
        };
        errors.finish(|| ReviewRequestFilter { status, send_mode })
    }
}

/// Review request as returned by the API.
#[derive(Debug, Serialize)]
pub struct ReviewRequestResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subject: String,
    pub message: String,
    pub send_mode: SendMode,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub status: Status,
    pub review_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerResponse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Vec<FeedbackResponse>>,
}

impl ReviewRequestResponse {
    pub fn new(request: ReviewRequest, review_url: String) -> Self {
        Self {
            id: request.id,
            customer_id: request.customer_id,
            subject: request.subject,
            message: request.message,
            send_mode: request.send_mode,
            is_scheduled: request.is_scheduled,
            scheduled_at: request.scheduled_at,
            sent_at: request.sent_at,
            opened_at: request.opened_at,
            completed_at: request.completed_at,
            expires_at: request.expires_at,
            status: request.status,
            review_url,
            created_at: request.created_at,
            updated_at: request.updated_at,
            customer: None,
            feedback: None,
        }
    }

    pub fn with_customer(mut self, customer: CustomerResponse) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_feedback(mut self, feedback: Vec<FeedbackResponse>) -> Self {
        self.feedback = Some(feedback);
        self
    }
}
