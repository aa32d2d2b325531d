mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::Utc;
use common::{TestApp, id_of, inline_request, token_of};
use review_desk::{audit::{AuditContext, REDACTED}, models::user::User};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn api_writes_record_actor_and_request() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let (key, plaintext) = app
        .key_with(business.id, &review_desk::policy::Permission::ALL)
        .await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/review-requests")
        .header("X-API-Key", &plaintext)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "review-desk-tests/1.0")
        .header("X-Forwarded-For", "198.51.100.20")
        .body(Body::from(inline_request("grace@example.com", "manual").to_string()))
        .unwrap();
    let (status, created) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED);

    let logs = app.audit_logs("review_request", id_of(&created, "id")).await;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];

    assert_eq!(log.event, "created");
    assert_eq!(log.actor_type, "api_key");
    assert_eq!(log.user_id, None);
    assert!(log.tags.contains(&format!("api_key:{}", key.id)));
    assert_eq!(log.method.as_deref(), Some("POST"));
    assert_eq!(log.url.as_deref(), Some("/api/v1/review-requests"));
    assert_eq!(log.ip_address.as_deref(), Some("198.51.100.20"));
    assert_eq!(log.user_agent.as_deref(), Some("review-desk-tests/1.0"));

    assert_eq!(log.new_values["unique_token"], REDACTED);
    assert_eq!(log.new_values["subject"], "How did we do?");
    assert!(log.new_values.get("created_at").is_none());
    assert_eq!(log.old_values, json!({}));

    // the inline customer was created in the same call
    let customer_logs = app.audit_logs("customer", id_of(&created, "customer_id")).await;
    assert_eq!(customer_logs.len(), 1);
    assert_eq!(customer_logs[0].event, "created");
}

#[tokio::test]
async fn counter_updates_are_not_audited() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let first = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;
    app.create_request(&key, inline_request("grace@example.com", "now"))
        .await;

    let customer_id = id_of(&first, "customer_id");
    assert_eq!(app.customer(customer_id).await.total_requests_sent, 2);
    let logs = app.audit_logs("customer", customer_id).await;
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn public_actions_are_attributed_to_the_system() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;
    let token = token_of(&created);

    let (status, feedback) = app
        .request(
            Method::POST,
            &format!("/r/{token}/feedback"),
            None,
            Some(json!({ "rating": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let logs = app.audit_logs("feedback", id_of(&feedback, "id")).await;
    assert_eq!(logs[0].actor_type, "system");
    assert!(logs[0].tags.contains(&"public_link".to_string()));
    assert_eq!(logs[0].method.as_deref(), Some("POST"));

    let request_logs = app.audit_logs("review_request", id_of(&created, "id")).await;
    let completed = request_logs.last().unwrap();
    assert_eq!(completed.event, "updated");
    assert_eq!(completed.changes["status"], "completed");
    assert_eq!(completed.old_values["status"], "pending");
}

#[tokio::test]
async fn deleting_records_the_old_values() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "manual"))
        .await;
    let id = id_of(&created, "id");

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let logs = app.audit_logs("review_request", id).await;
    let deleted = logs.last().unwrap();
    assert_eq!(deleted.event, "deleted");
    assert_eq!(deleted.old_values["subject"], "How did we do?");
    assert_eq!(deleted.old_values["unique_token"], REDACTED);
    assert_eq!(deleted.new_values, json!({}));
}

#[tokio::test]
async fn operator_password_never_reaches_the_trail() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        business_id: Some(business.id),
        name: "Ada".into(),
        email: "ada@bakery.test".into(),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
        remember_token: Some("remember-me".into()),
        created_at: now,
        updated_at: now,
    };
    app.state
        .store
        .insert_user(&user, &AuditContext::system())
        .await
        .unwrap();

    let logs = app.audit_logs("user", user.id).await;
    assert_eq!(logs.len(), 1);
    let serialized = serde_json::to_string(&logs[0]).unwrap();
    assert_eq!(logs[0].new_values["password_hash"], REDACTED);
    assert!(!serialized.contains("argon2id"));
    assert!(!serialized.contains("remember-me"));
}

#[tokio::test]
async fn duplicate_operator_email_is_a_field_error() {
    let app = TestApp::new();
    let now = Utc::now();
    let user = |id| User {
        id,
        business_id: None,
        name: "Ada".into(),
        email: "ada@bakery.test".into(),
        password_hash: "hash".into(),
        remember_token: None,
        created_at: now,
        updated_at: now,
    };
    let ctx = AuditContext::system();

    app.state.store.insert_user(&user(Uuid::new_v4()), &ctx).await.unwrap();
    let err = app
        .state
        .store
        .insert_user(&user(Uuid::new_v4()), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, review_desk::error::AppError::Validation(fields) if fields.contains_key("email")));
}
