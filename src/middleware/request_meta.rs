//! Captures client IP, user agent, URL and method for the audit trail.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::audit::RequestMeta;

/// First hop of `X-Forwarded-For`, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Inserts a [`RequestMeta`] into the request extensions.
///
/// The peer address is only known when the server was started with connect
/// info; it is simply absent otherwise.
pub async fn capture_request_meta(mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let meta = RequestMeta {
        ip: client_ip(request.headers(), peer),
        user_agent: request
            .headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        url: Some(request.uri().to_string()),
        method: Some(request.method().to_string()),
    };
    request.extensions_mut().insert(meta);

    next.run(request).await
}
