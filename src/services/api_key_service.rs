//! API key issuance and authentication.
//!
//! Only the SHA-256 hash of a key and a short preview are stored. Presented keys
//! are hashed the same way and compared in constant time against the hashes of
//! every active key; nothing is cached between requests.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::api_key::ApiKey;
use crate::models::business::Business;
use crate::policy::Permission;
use crate::repositories::{Change, Store};

/// Prefix of every issued key.
pub const KEY_PREFIX: &str = "rdk_";

/// Hash an API key with SHA-256.
///
/// # Output
///
/// 64 hex characters
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new API key: `rdk_` followed by 48 hex characters (24 random bytes).
pub fn generate_key() -> String {
    let bytes: [u8; 24] = rand::random();
    format!("{KEY_PREFIX}{}", hex::encode(bytes))
}

/// Display fragment of a key, e.g. `rdk_1a2b…9f0e`.
pub fn key_preview(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 12 {
        return "…".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// A freshly issued key. `plaintext` is shown once and never stored.
#[derive(Debug)]
pub struct IssuedKey {
    pub key: ApiKey,
    pub plaintext: String,
}

/// Create an API key for a business.
///
/// # Errors
///
/// - `Validation`: no permission granted
/// - `Database`: database error occurred
pub async fn issue(
    store: &dyn Store,
    business_id: Uuid,
    name: &str,
    permissions: &[Permission],
    expires_at: Option<DateTime<Utc>>,
    ctx: &AuditContext,
) -> Result<IssuedKey, AppError> {
    if permissions.is_empty() {
        return Err(AppError::field("permissions", "At least one permission is required."));
    }
    if store.find_business(business_id).await?.is_none() {
        return Err(AppError::field("business_id", "The selected business id is invalid."));
    }

    let plaintext = generate_key();
    let now = Utc::now();
    let key = ApiKey {
        id: Uuid::new_v4(),
        business_id,
        name: name.to_string(),
        key_hash: hash_key(&plaintext),
        key_preview: key_preview(&plaintext),
        permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
        is_active: true,
        expires_at,
        last_used_at: None,
        last_used_ip: None,
        created_at: now,
        updated_at: now,
    };

    let key = store.insert_api_key(&key, ctx).await?;
    tracing::info!(api_key_id = %key.id, business_id = %business_id, "API key issued");
    Ok(IssuedKey { key, plaintext })
}

/// Soft-revoke a key. `None` when it does not exist or is already revoked.
pub async fn revoke(
    store: &dyn Store,
    id: Uuid,
    ctx: &AuditContext,
) -> Result<Option<Change<ApiKey>>, AppError> {
    store.set_api_key_active(id, false, ctx).await
}

/// Re-activate a revoked key.
pub async fn restore(
    store: &dyn Store,
    id: Uuid,
    ctx: &AuditContext,
) -> Result<Option<Change<ApiKey>>, AppError> {
    store.set_api_key_active(id, true, ctx).await
}

/// Resolve a presented key to its record and business.
///
/// # Process
///
/// 1. Hash the presented key
/// 2. Compare against every active key hash in constant time
/// 3. Check expiry and that the business is active
/// 4. Record usage (timestamp and source IP)
///
/// Usage is recorded as soon as the key is valid, before any permission check.
///
/// # Errors
///
/// - `InvalidApiKey`: unknown, revoked or expired key, or deactivated business
/// - `Database`: database error occurred
pub async fn authenticate(
    store: &dyn Store,
    presented: &str,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(ApiKey, Business), AppError> {
    let presented_hash = hash_key(presented);

    let mut matched = None;
    for key in store.active_api_keys().await? {
        if bool::from(presented_hash.as_bytes().ct_eq(key.key_hash.as_bytes())) {
            matched = Some(key);
        }
    }

    let key = matched
        .filter(|key| key.is_usable_at(now))
        .ok_or(AppError::InvalidApiKey)?;

    let business = store
        .find_business(key.business_id)
        .await?
        .filter(|business| business.is_active)
        .ok_or(AppError::InvalidApiKey)?;

    if let Err(e) = store.record_api_key_usage(key.id, now, ip).await {
        tracing::warn!(api_key_id = %key.id, error = %e, "failed to record API key usage");
    }

    Ok((key, business))
}
