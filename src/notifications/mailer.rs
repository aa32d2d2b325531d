//! Outbound mail transports.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::AppError;

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError>;
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_token: Option<String>,
}

impl HttpMailer {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: String, api_token: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {e}")))?;
        Ok(Self {
            client,
            api_url,
            api_token,
        })
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    to_addr: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError> {
        let payload = RelayPayload {
            to_addr: &mail.to,
            subject: &mail.subject,
            text_body: &mail.text_body,
        };

        let mut request = self.client.post(&self.api_url).json(&payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Mail relay connection error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Mail relay rejected message. Status: {status}, Body: {body}"
            )));
        }

        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail relay not configured; message logged");
        tracing::debug!(body = %mail.text_body);
        Ok(())
    }
}
