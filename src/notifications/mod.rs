//! Notification dispatch boundary.
//!
//! Services hand a [`Notification`] to a [`Notifier`] and move on. The
//! production notifier only enqueues; a delivery task renders each message and
//! passes it to a [`Mailer`]. Delivery failures are logged and never reach the
//! operation that produced the notification.

mod mailer;

pub use mailer::{HttpMailer, LogMailer, Mailer, OutgoingMail};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;

/// Something a person should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Ask a customer for feedback.
    ReviewRequest {
        review_request_id: Uuid,
        business_name: String,
        customer_name: String,
        customer_email: String,
        subject: String,
        message: String,
        review_url: String,
        opt_out_url: String,
    },
    /// Tell a business that a customer left feedback.
    FeedbackReceived {
        feedback_id: Uuid,
        business_name: String,
        business_email: String,
        customer_name: Option<String>,
        rating: i32,
        comment: Option<String>,
    },
}

impl Notification {
    pub fn render(&self) -> OutgoingMail {
        match self {
            Notification::ReviewRequest {
                business_name,
                customer_name,
                customer_email,
                subject,
                message,
                review_url,
                opt_out_url,
                ..
            } => OutgoingMail {
                to: customer_email.clone(),
                subject: subject.clone(),
                text_body: format!(
                    "Hi {customer_name},\n\n{message}\n\nLeave your feedback for {business_name}: {review_url}\n\n\
                     To stop receiving these requests: {opt_out_url}\n"
                ),
            },
            Notification::FeedbackReceived {
                business_name,
                business_email,
                customer_name,
                rating,
                comment,
                ..
            } => OutgoingMail {
                to: business_email.clone(),
                subject: format!("New {rating}-star feedback for {business_name}"),
                text_body: format!(
                    "{} rated {business_name} {rating}/5.\n\n{}\n",
                    customer_name.as_deref().unwrap_or("A customer"),
                    comment.as_deref().unwrap_or("(no comment)"),
                ),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Notification::ReviewRequest { .. } => "review_request",
            Notification::FeedbackReceived { .. } => "feedback_received",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hands the notification over for delivery. Returns once it is accepted,
    /// not once it is delivered.
    async fn dispatch(&self, notification: Notification) -> Result<(), AppError>;
}

/// Notifier backed by a bounded in-process queue.
#[derive(Debug, Clone)]
pub struct QueuedNotifier {
    sender: mpsc::Sender<Notification>,
}

impl QueuedNotifier {
    /// Creates the notifier and the receiving end to pass to [`run_delivery`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for QueuedNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), AppError> {
        self.sender
            .try_send(notification)
            .map_err(|e| AppError::Internal(format!("notification queue unavailable: {e}")))
    }
}

/// Drains the queue until every sender is dropped.
pub async fn run_delivery(mut receiver: mpsc::Receiver<Notification>, mailer: Arc<dyn Mailer>) {
    tracing::info!("Starting notification delivery worker...");

    while let Some(notification) = receiver.recv().await {
        let mail = notification.render();
        match mailer.send(&mail).await {
            Ok(()) => tracing::info!(kind = notification.kind(), to = %mail.to, "notification delivered"),
            Err(e) => tracing::error!(
                kind = notification.kind(),
                to = %mail.to,
                error = %e,
                "notification delivery failed"
            ),
        }
    }

    tracing::info!("Notification delivery worker stopped");
}
