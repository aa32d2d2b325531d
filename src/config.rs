//! Application configuration management.
//!
//! Configuration is loaded from environment variables with the `envy` crate,
//! after an optional `.env` file has been read.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `APP_KEY` (required): secret used to sign opt-out links
/// - `SERVER_PORT`: HTTP server port, defaults to 3000
/// - `APP_URL`: public base URL for review links, defaults to `http://localhost:3000`
/// - `MAIL_SERVICE_URL` / `MAIL_SERVICE_TOKEN`: mail relay; notifications are only logged when unset
/// - `REVIEW_REQUEST_TTL_DAYS`: validity window after sending, defaults to 30
/// - `WORKER_POLL_SECONDS`: deferred dispatch poll interval, defaults to 5
/// - `EXPIRY_SWEEP_SECONDS`: expiry sweep interval, defaults to 300
/// - `DISPATCH_LEASE_SECONDS`: reclaim window for stuck dispatch tasks, defaults to 300
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub app_key: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_app_url")]
    pub app_url: String,

    #[serde(default)]
    pub mail_service_url: Option<String>,

    #[serde(default)]
    pub mail_service_token: Option<String>,

    #[serde(default = "default_ttl_days")]
    pub review_request_ttl_days: i64,

    #[serde(default = "default_poll_seconds")]
    pub worker_poll_seconds: u64,

    #[serde(default = "default_sweep_seconds")]
    pub expiry_sweep_seconds: u64,

    #[serde(default = "default_lease_seconds")]
    pub dispatch_lease_seconds: i64,
}

fn default_port() -> u16 {
    3000
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

/// Upper bound of `REVIEW_REQUEST_TTL_DAYS`.
pub const MAX_TTL_DAYS: i64 = 3650;

/// Upper bound of `DISPATCH_LEASE_SECONDS`.
pub const MAX_LEASE_SECONDS: i64 = 86_400;

fn default_ttl_days() -> i64 {
    30
}

fn default_poll_seconds() -> u64 {
    5
}

fn default_sweep_seconds() -> u64 {
    300
}

fn default_lease_seconds() -> i64 {
    300
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value cannot be
    /// parsed, or a duration is out of range.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), envy::Error> {
        if !(1..=MAX_TTL_DAYS).contains(&self.review_request_ttl_days)
            || chrono::Duration::try_days(self.review_request_ttl_days).is_none()
        {
            return Err(envy::Error::Custom(format!(
                "REVIEW_REQUEST_TTL_DAYS must be between 1 and {MAX_TTL_DAYS}"
            )));
        }
        if !(1..=MAX_LEASE_SECONDS).contains(&self.dispatch_lease_seconds) {
            return Err(envy::Error::Custom(format!(
                "DISPATCH_LEASE_SECONDS must be between 1 and {MAX_LEASE_SECONDS}"
            )));
        }
        Ok(())
    }

    /// Configuration for in-process use (tests, local experiments) without a database.
    pub fn for_local(app_key: &str) -> Self {
        Self {
            database_url: String::new(),
            app_key: app_key.to_string(),
            server_port: default_port(),
            app_url: default_app_url(),
            mail_service_url: None,
            mail_service_token: None,
            review_request_ttl_days: default_ttl_days(),
            worker_poll_seconds: default_poll_seconds(),
            expiry_sweep_seconds: default_sweep_seconds(),
            dispatch_lease_seconds: default_lease_seconds(),
        }
    }

    /// Clamped to the range accepted at load, so adding it to a timestamp cannot overflow.
    pub fn review_request_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.review_request_ttl_days.clamp(1, MAX_TTL_DAYS))
    }

    pub fn dispatch_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_lease_seconds.clamp(1, MAX_LEASE_SECONDS))
    }
}
