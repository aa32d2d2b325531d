//! API Key model for authentication.
//!
//! API keys authenticate server-to-server integrations of one business. Only a
//! SHA-256 hash of the secret and a short display preview are stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table. `permissions` is a `TEXT[]` of permission
/// strings such as `review-requests.read`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiKey {
    /// Unique identifier for this API key
    pub id: Uuid,

    /// Business the key acts for
    pub business_id: Uuid,

    /// Display name chosen by the operator
    pub name: String,

    /// SHA-256 hash of the secret (64 hex characters)
    pub key_hash: String,

    /// Non-secret fragment shown in listings, e.g. `rdk_1a2b…9f0e`
    pub key_preview: String,

    /// Permission strings granted to this key
    pub permissions: Vec<String>,

    /// Revoked keys stay in the table with `is_active = false`
    pub is_active: bool,

    /// Keys without an expiry never expire
    pub expires_at: Option<DateTime<Utc>>,

    pub last_used_at: Option<DateTime<Utc>>,

    pub last_used_ip: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether the key may authenticate at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Listing view of an API key. Never carries the hash.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key_preview: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key_preview: key.key_preview,
            permissions: key.permissions,
            is_active: key.is_active,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}
