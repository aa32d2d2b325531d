mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use common::{TestApp, id_of, inline_request};
use review_desk::{
    audit::AuditContext, models::business::Business, policy::Permission,
    services::api_key_service,
};
use uuid::Uuid;

#[tokio::test]
async fn missing_key_is_unauthenticated() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::GET, "/api/v1/review-requests", None, None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_api_key");
}

#[tokio::test]
async fn unknown_key_is_unauthenticated() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    app.full_key(business.id).await;

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/review-requests",
            Some("rdk_not-a-real-key"),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn bearer_token_is_accepted_and_usage_recorded() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let (key, plaintext) = app.key_with(business.id, &Permission::ALL).await;
    assert!(key.last_used_at.is_none());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/review-requests")
        .header(header::AUTHORIZATION, format!("Bearer {plaintext}"))
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let stored = app
        .state
        .store
        .active_api_keys()
        .await
        .unwrap()
        .into_iter()
        .find(|k| k.id == key.id)
        .unwrap();
    assert!(stored.last_used_at.is_some());
    assert_eq!(stored.last_used_ip.as_deref(), Some("203.0.113.7"));

    // usage bookkeeping stays out of the audit trail
    let logs = app.audit_logs("api_key", key.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event, "created");
}

#[tokio::test]
async fn revoked_key_stops_working_until_restored() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let (key, plaintext) = app.key_with(business.id, &Permission::ALL).await;
    let ctx = AuditContext::system();

    api_key_service::revoke(app.state.store.as_ref(), key.id, &ctx)
        .await
        .unwrap()
        .unwrap();
    let (status, _) = app
        .request(Method::GET, "/api/v1/review-requests", Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    api_key_service::restore(app.state.store.as_ref(), key.id, &ctx)
        .await
        .unwrap()
        .unwrap();
    let (status, _) = app
        .request(Method::GET, "/api/v1/review-requests", Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let events: Vec<String> = app
        .audit_logs("api_key", key.id)
        .await
        .into_iter()
        .map(|log| log.event)
        .collect();
    assert_eq!(events, ["created", "updated", "restored"]);
}

#[tokio::test]
async fn expired_key_is_rejected() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let (_, plaintext) = app
        .key_expiring(
            business.id,
            &Permission::ALL,
            Some(Utc::now() - Duration::minutes(1)),
        )
        .await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/review-requests", Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn key_of_deactivated_business_is_rejected() {
    let app = TestApp::new();
    let mut business = Business::new("Closed".into(), "owner@closed.test".into(), Utc::now());
    business.is_active = false;
    let business = app
        .state
        .store
        .insert_business(&business, &AuditContext::system())
        .await
        .unwrap();
    let plaintext = app.full_key(business.id).await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/review-requests", Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_permission_is_forbidden_and_has_no_effect() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let full = app.full_key(business.id).await;
    let (_, read_only) = app
        .key_with(business.id, &[Permission::ReviewRequestsRead])
        .await;

    let created = app
        .create_request(&full, inline_request("grace@example.com", "manual"))
        .await;
    let id = id_of(&created, "id");
    let uri = format!("/api/v1/review-requests/{id}");

    let (status, body) = app
        .request(Method::DELETE, &uri, Some(&read_only), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "missing_permission");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("review-requests.delete"));

    let (status, _) = app.request(Method::GET, &uri, Some(&read_only), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/review-requests",
            Some(&read_only),
            Some(inline_request("ada@example.com", "now")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.notifier.review_requests_sent(), 0);
}

#[tokio::test]
async fn other_tenant_ids_look_like_unknown_ids() {
    let app = TestApp::new();
    let bakery = app.business("Bakery").await;
    let florist = app.business("Florist").await;
    let bakery_key = app.full_key(bakery.id).await;
    let florist_key = app.full_key(florist.id).await;

    let created = app
        .create_request(&bakery_key, inline_request("grace@example.com", "manual"))
        .await;
    let id = id_of(&created, "id");

    let (foreign_status, foreign_body) = app
        .request(
            Method::GET,
            &format!("/api/v1/review-requests/{id}"),
            Some(&florist_key),
            None,
        )
        .await;
    let (unknown_status, unknown_body) = app
        .request(
            Method::GET,
            &format!("/api/v1/review-requests/{}", Uuid::new_v4()),
            Some(&florist_key),
            None,
        )
        .await;

    assert_eq!(foreign_status, StatusCode::FORBIDDEN);
    assert_eq!(foreign_status, unknown_status);
    assert_eq!(foreign_body, unknown_body);

    for (method, uri) in [
        (Method::DELETE, format!("/api/v1/review-requests/{id}")),
        (Method::POST, format!("/api/v1/review-requests/{id}/send")),
    ] {
        let (status, _) = app.request(method, &uri, Some(&florist_key), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
    assert!(app.review_request(id).await.sent_at.is_none());
}

#[tokio::test]
async fn health_needs_no_key() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
