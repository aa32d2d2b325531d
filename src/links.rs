//! Public links handed to customers: the review link and the signed opt-out link.
//!
//! The review request token is the sole authorization of the review link. The
//! opt-out link additionally carries an HMAC-SHA256 signature of the token under
//! `APP_KEY`, so a leaked review link alone cannot unsubscribe anyone.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Generate an unguessable review request token.
///
/// # Output
///
/// 64 hex characters (32 random bytes)
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Builds and verifies public links.
#[derive(Clone)]
pub struct Links {
    base: Url,
    mac: HmacSha256,
}

impl std::fmt::Debug for Links {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Links").field("base", &self.base.as_str()).finish()
    }
}

impl Links {
    /// # Errors
    ///
    /// Returns an error if `app_url` is not an absolute http(s) URL or `app_key` is empty.
    pub fn new(app_url: &str, app_key: &str) -> Result<Self, AppError> {
        let mut base = Url::parse(app_url)
            .map_err(|e| AppError::Internal(format!("APP_URL is not a valid URL: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::Internal("APP_URL must use http or https".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        if app_key.is_empty() {
            return Err(AppError::Internal("APP_KEY must not be empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(app_key.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid APP_KEY: {e}")))?;

        Ok(Self { base, mac })
    }

    fn join(&self, path: &str) -> Url {
        // the base always ends in '/' and `path` is relative, so joining cannot fail
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    pub fn review_url(&self, token: &str) -> String {
        self.join(&format!("r/{token}")).into()
    }

    pub fn opt_out_url(&self, token: &str) -> String {
        let mut url = self.join(&format!("r/{token}/opt-out"));
        url.query_pairs_mut()
            .append_pair("signature", &self.opt_out_signature(token));
        url.into()
    }

    /// Hex HMAC-SHA256 of `opt-out:<token>`.
    pub fn opt_out_signature(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(b"opt-out:");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of an opt-out signature.
    pub fn verify_opt_out(&self, token: &str, signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(b"opt-out:");
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}
