//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from `X-API-Key` or `Authorization: Bearer`
//! 2. Resolve it against the stored key hashes
//! 3. Inject the resulting [`Principal`] into the request
//! 4. Reject unauthenticated requests with HTTP 401
//!
//! Permission checks happen later, per operation, through the policy module.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::audit::RequestMeta;
use crate::error::AppError;
use crate::policy::Principal;
use crate::services::api_key_service;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Presented credential, if any. `X-API-Key` wins over `Authorization`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return Some(key);
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Read the key from the headers; missing → `MissingApiKey` (401)
/// 2. Authenticate it (records usage on success); invalid → `InvalidApiKey` (401)
/// 3. Insert a [`Principal`] for the key into the request extensions
///
/// # Arguments
///
/// * `State(state)` - Application state injected by Axum
/// * `request` - Incoming HTTP request (mutable to add extensions)
/// * `next` - Next middleware/handler in the chain
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = presented_key(request.headers())
        .ok_or(AppError::MissingApiKey)?
        .to_string();

    let ip = request
        .extensions()
        .get::<RequestMeta>()
        .and_then(|meta| meta.ip.clone());

    let (key, business) =
        api_key_service::authenticate(state.store.as_ref(), &presented, ip.as_deref(), Utc::now())
            .await?;

    tracing::debug!(api_key_id = %key.id, business_id = %business.id, "API key authenticated");
    request.extensions_mut().insert(Principal::for_api_key(&key));

    Ok(next.run(request).await)
}
