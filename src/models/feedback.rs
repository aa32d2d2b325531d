//! Feedback model: a rating and comment left by a customer, plus the operator
//! moderation payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::UnknownVariant;
use crate::validation::Errors;

/// Visibility and trust classification of a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Published,
    SoftFlagged,
    Flagged,
    Hidden,
}

impl ModerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationStatus::Published => "published",
            ModerationStatus::SoftFlagged => "soft_flagged",
            ModerationStatus::Flagged => "flagged",
            ModerationStatus::Hidden => "hidden",
        }
    }
}

impl FromStr for ModerationStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "published" => Ok(ModerationStatus::Published),
            "soft_flagged" => Ok(ModerationStatus::SoftFlagged),
            "flagged" => Ok(ModerationStatus::Flagged),
            "hidden" => Ok(ModerationStatus::Hidden),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl TryFrom<String> for ModerationStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a feedback record from the database.
///
/// `rating` is always within 1..=5 (validated on submission, CHECK constraint in the table).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Feedback {
    pub id: Uuid,
    pub business_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub review_request_id: Option<Uuid>,
    pub rating: i32,
    pub comment: Option<String>,
    /// Label from the external sentiment classifier, if it has run.
    pub sentiment: Option<String>,
    #[sqlx(try_from = "String")]
    pub moderation_status: ModerationStatus,
    pub is_public: bool,
    pub reply: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /r/{token}/feedback`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitFeedbackPayload {
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: Option<i32>,

    #[validate(length(max = 5000, message = "may not be greater than 5000 characters"))]
    pub comment: Option<String>,
}

/// Validated feedback submission.
#[derive(Debug, Clone)]
pub struct SubmitFeedback {
    pub rating: i32,
    pub comment: Option<String>,
}

impl SubmitFeedbackPayload {
    pub fn into_command(self) -> Result<SubmitFeedback, AppError> {
        let mut errors = Errors::validate(&self);
        let rating = errors.require("rating", self.rating);
        let comment = self.comment.filter(|c| !c.trim().is_empty());
        match rating {
            Some(rating) => errors.finish(|| SubmitFeedback { rating, comment }),
            None => Err(errors.into_error()),
        }
    }
}

/// Body of `PATCH /feedback/{id}`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateFeedbackPayload {
    pub moderation_status: Option<String>,

    pub is_public: Option<bool>,

    #[validate(length(max = 5000, message = "may not be greater than 5000 characters"))]
    pub reply: Option<String>,

    #[validate(length(max = 5000, message = "may not be greater than 5000 characters"))]
    pub comment: Option<String>,
}

/// Validated operator moderation edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackUpdate {
    pub moderation_status: Option<ModerationStatus>,
    pub is_public: Option<bool>,
    pub reply: Option<String>,
    pub comment: Option<String>,
}

impl UpdateFeedbackPayload {
    pub fn into_update(self) -> Result<FeedbackUpdate, AppError> {
        let mut errors = Errors::validate(&self);
        let moderation_status = match self.moderation_status.as_deref() {
            None => None,
            Some(value) => value
                .parse::<ModerationStatus>()
                .map_err(|_| {
                    errors.add(
                        "moderation_status",
                        "The selected moderation status is invalid.",
                    )
                })
                .ok(),
        };
        errors.finish(|| FeedbackUpdate {
            moderation_status,
            is_public: self.is_public,
            reply: self.reply,
            comment: self.comment,
        })
    }
}

impl FeedbackUpdate {
    /// The record after applying this edit. A new reply stamps `replied_at`.
    pub fn apply(&self, current: &Feedback, now: DateTime<Utc>) -> Feedback {
        let mut next = current.clone();
        if let Some(status) = self.moderation_status {
            next.moderation_status = status;
        }
        if let Some(is_public) = self.is_public {
            next.is_public = is_public;
        }
        if let Some(comment) = &self.comment {
            next.comment = Some(comment.clone());
        }
        if let Some(reply) = &self.reply {
            if current.reply.as_deref() != Some(reply.as_str()) {
                next.replied_at = Some(now);
            }
            next.reply = Some(reply.clone());
        }
        next.updated_at = now;
        next
    }
}

/// Query string of `GET /feedback`.
#[derive(Debug, Default, Deserialize)]
pub struct FeedbackQuery {
    pub moderation_status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl FeedbackQuery {
    pub fn moderation_filter(&self) -> Result<Option<ModerationStatus>, AppError> {
        match self.moderation_status.as_deref() {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                AppError::field(
                    "moderation_status",
                    "The selected moderation status is invalid.",
                )
            }),
        }
    }
}

/// Feedback as returned by the API.
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub review_request_id: Option<Uuid>,
    pub rating: i32,
    pub comment: Option<String>,
    pub sentiment: Option<String>,
    pub moderation_status: ModerationStatus,
    pub is_public: bool,
    pub reply: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl From<Feedback> for FeedbackResponse {
    fn from(feedback: Feedback) -> Self {
        Self {
            id: feedback.id,
            customer_id: feedback.customer_id,
            review_request_id: feedback.review_request_id,
            rating: feedback.rating,
            comment: feedback.comment,
            sentiment: feedback.sentiment,
            moderation_status: feedback.moderation_status,
            is_public: feedback.is_public,
            reply: feedback.reply,
            replied_at: feedback.replied_at,
            submitted_at: feedback.submitted_at,
        }
    }
}
