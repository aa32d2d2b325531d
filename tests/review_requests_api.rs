mod common;

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Duration, Utc};
use common::{TestApp, id_of, inline_request};
use review_desk::background::{DispatchReport, process_due_tasks};
use review_desk::models::review_request::Status;
use review_desk::services::review_request_service;
use serde_json::json;

#[tokio::test]
async fn send_now_delivers_and_counts_the_request() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let body = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;

    assert_eq!(body["status"], "pending");
    assert_eq!(body["send_mode"], "now");
    assert!(body["sent_at"].is_string());
    assert_eq!(body["customer"]["total_requests_sent"], 1);
    assert!(body["review_url"].as_str().unwrap().starts_with("http://localhost:3000/r/"));

    let customer = app.customer(id_of(&body, "customer_id")).await;
    assert_eq!(customer.total_requests_sent, 1);
    assert!(customer.last_request_sent_at.is_some());
    assert_eq!(app.notifier.review_requests_sent(), 1);
}

#[tokio::test]
async fn inline_customer_is_matched_by_email() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let first = app
        .create_request(&key, inline_request("Grace@Example.com", "manual"))
        .await;
    let second = app
        .create_request(&key, inline_request("grace@example.com ", "manual"))
        .await;

    assert_eq!(first["customer_id"], second["customer_id"]);
    let customer = app.customer(id_of(&first, "customer_id")).await;
    assert_eq!(customer.email, "grace@example.com");
    assert_eq!(customer.total_requests_sent, 2);
}

#[tokio::test]
async fn opted_out_customer_cannot_be_asked_again() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let created = app
        .create_request(&key, inline_request("grace@example.com", "manual"))
        .await;
    let customer_id = id_of(&created, "customer_id");
    app.state
        .store
        .set_customer_opted_out(customer_id, true, &review_desk::audit::AuditContext::system())
        .await
        .unwrap();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/review-requests",
            Some(&key),
            Some(json!({
                "customer_id": customer_id,
                "subject": "Again?",
                "message": "One more time",
                "send_mode": "now"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "business_rule");
    assert_eq!(app.customer(customer_id).await.total_requests_sent, 1);
    assert_eq!(app.notifier.review_requests_sent(), 0);
}

#[tokio::test]
async fn sent_request_cannot_be_rescheduled_or_sent_again() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;
    let id = id_of(&created, "id");
    let uri = format!("/api/v1/review-requests/{id}");

    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&key),
            Some(json!({ "send_mode": "scheduled", "schedule_hours": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .request(Method::POST, &format!("{uri}/send"), Some(&key), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let stored = app.review_request(id).await;
    let sent_at: DateTime<Utc> = created["sent_at"].as_str().unwrap().parse().unwrap();
    assert_eq!(stored.sent_at, Some(sent_at));
    assert_eq!(app.notifier.review_requests_sent(), 1);
}

#[tokio::test]
async fn expired_request_cannot_be_rescheduled() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "manual"))
        .await;
    let id = id_of(&created, "id");

    let expired = review_request_service::expire_overdue(&app.state, Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(expired, 1);
    let before = app.review_request(id).await;

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            Some(json!({ "send_mode": "scheduled", "schedule_hours": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "business_rule");

    let after = app.review_request(id).await;
    assert_eq!(after.status, Status::Expired);
    assert_eq!(after.scheduled_at, None);
    assert_eq!(after.expires_at, before.expires_at);

    // nothing was queued for it
    let report = process_due_tasks(&app.state, Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(report.sent + report.skipped + report.failed, 0);
}

#[tokio::test]
async fn early_send_of_a_scheduled_request_records_the_real_send_time() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut body = inline_request("grace@example.com", "scheduled");
    body["schedule_hours"] = json!(720);
    let created = app.create_request(&key, body).await;
    let id = id_of(&created, "id");
    let customer_id = id_of(&created, "customer_id");

    // creation counts the request without claiming a future send
    let stored = app.review_request(id).await;
    let customer = app.customer(customer_id).await;
    assert_eq!(customer.last_request_sent_at, Some(stored.created_at));

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/review-requests/{id}/send"),
            Some(&key),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let sent_at = app.review_request(id).await.sent_at;
    assert!(sent_at.is_some());
    assert_eq!(app.customer(customer_id).await.last_request_sent_at, sent_at);
}

#[tokio::test]
async fn manual_request_is_sent_on_demand() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "manual"))
        .await;
    assert!(created["sent_at"].is_null());
    assert_eq!(app.notifier.review_requests_sent(), 0);

    let id = id_of(&created, "id");
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/review-requests/{id}/send"),
            Some(&key),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["sent_at"].is_string());
    assert_eq!(body["send_mode"], "now");
    assert_eq!(app.notifier.review_requests_sent(), 1);
}

#[tokio::test]
async fn scheduled_request_is_sent_by_the_worker() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut body = inline_request("grace@example.com", "scheduled");
    body["schedule_hours"] = json!(24);
    let created = app.create_request(&key, body).await;
    let id = id_of(&created, "id");

    assert_eq!(created["is_scheduled"], true);
    assert!(created["sent_at"].is_null());
    assert!(created["scheduled_at"].is_string());

    // not due yet
    let report = process_due_tasks(&app.state, Utc::now()).await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(app.notifier.review_requests_sent(), 0);

    let later = Utc::now() + Duration::hours(25);
    let report = process_due_tasks(&app.state, later).await.unwrap();
    assert_eq!(report.sent, 1);

    let stored = app.review_request(id).await;
    assert_eq!(stored.sent_at, Some(later));
    assert!(stored.is_scheduled);
    assert_eq!(stored.expires_at, later + app.state.config.review_request_ttl());
    assert_eq!(app.notifier.review_requests_sent(), 1);

    let report = process_due_tasks(&app.state, later + Duration::hours(1)).await.unwrap();
    assert_eq!(report.sent + report.skipped + report.failed, 0);
    assert_eq!(app.notifier.review_requests_sent(), 1);
}

#[tokio::test]
async fn refused_notification_is_retried_by_the_worker() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut body = inline_request("grace@example.com", "scheduled");
    body["schedule_hours"] = json!(24);
    let created = app.create_request(&key, body).await;
    let id = id_of(&created, "id");

    app.notifier.refuse_next(1);
    let due = Utc::now() + Duration::hours(25);
    let report = process_due_tasks(&app.state, due).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(app.notifier.review_requests_sent(), 0);
    let sent_at = app.review_request(id).await.sent_at;
    assert_eq!(sent_at, Some(due));

    // after the backoff the same task hands the notification over again
    let retry = due + Duration::minutes(3);
    let report = process_due_tasks(&app.state, retry).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(app.notifier.review_requests_sent(), 1);
    assert_eq!(app.review_request(id).await.sent_at, sent_at);

    let report = process_due_tasks(&app.state, retry + Duration::hours(1)).await.unwrap();
    assert_eq!(report, DispatchReport::default());
}

#[tokio::test]
async fn reschedule_leaves_the_old_task_without_effect() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut body = inline_request("grace@example.com", "scheduled");
    body["schedule_hours"] = json!(24);
    let created = app.create_request(&key, body).await;
    let id = id_of(&created, "id");

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            Some(json!({ "send_mode": "scheduled", "schedule_hours": 48 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let report = process_due_tasks(&app.state, Utc::now() + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.skipped, 1);
    assert!(app.review_request(id).await.sent_at.is_none());

    let report = process_due_tasks(&app.state, Utc::now() + Duration::hours(49))
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(app.notifier.review_requests_sent(), 1);
}

#[tokio::test]
async fn deleted_scheduled_request_is_never_sent() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut body = inline_request("grace@example.com", "scheduled");
    body["schedule_hours"] = json!(1);
    let created = app.create_request(&key, body).await;
    let id = id_of(&created, "id");

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let report = process_due_tasks(&app.state, Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(app.notifier.review_requests_sent(), 0);

    // counters are a ledger of what was sent, deletion does not rewind them
    assert_eq!(app.customer(id_of(&created, "customer_id")).await.total_requests_sent, 1);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_payload_reports_every_field() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/review-requests",
            Some(&key),
            Some(json!({ "send_mode": "scheduled", "schedule_hours": 900 })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields = body["error"]["fields"].as_object().unwrap();
    assert!(fields.contains_key("customer_id"));
    assert!(fields.contains_key("subject"));
    assert!(fields.contains_key("message"));
    assert!(fields.contains_key("schedule_hours"));
}

#[tokio::test]
async fn customer_of_another_business_is_rejected() {
    let app = TestApp::new();
    let bakery = app.business("Bakery").await;
    let florist = app.business("Florist").await;
    let bakery_key = app.full_key(bakery.id).await;
    let florist_key = app.full_key(florist.id).await;

    let created = app
        .create_request(&bakery_key, inline_request("grace@example.com", "manual"))
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/review-requests",
            Some(&florist_key),
            Some(json!({
                "customer_id": created["customer_id"],
                "subject": "Hi",
                "message": "Hello",
                "send_mode": "manual"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["fields"]["customer_id"].is_array());
}

#[tokio::test]
async fn list_is_scoped_to_the_business_and_filterable() {
    let app = TestApp::new();
    let bakery = app.business("Bakery").await;
    let florist = app.business("Florist").await;
    let bakery_key = app.full_key(bakery.id).await;
    let florist_key = app.full_key(florist.id).await;

    app.create_request(&bakery_key, inline_request("a@example.com", "now"))
        .await;
    app.create_request(&bakery_key, inline_request("b@example.com", "manual"))
        .await;
    app.create_request(&florist_key, inline_request("c@example.com", "now"))
        .await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/review-requests", Some(&bakery_key), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = app
        .request(
            Method::GET,
            "/api/v1/review-requests?send_mode=manual",
            Some(&bakery_key),
            None,
        )
        .await;
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["send_mode"], "manual");

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/review-requests?status=archived",
            Some(&bakery_key),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["fields"]["status"].is_array());
}

#[tokio::test]
async fn show_includes_customer_and_feedback() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;
    let id = id_of(&created, "id");

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/review-requests/{id}"),
            Some(&key),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["customer"]["email"], "grace@example.com");
    assert_eq!(body["feedback"], json!([]));
    assert!(body.get("unique_token").is_none());
    assert_eq!(app.review_request(id).await.status, Status::Pending);
}

#[tokio::test]
async fn malformed_id_is_a_field_error() {
    let app = TestApp::new();
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    for (method, uri) in [
        (Method::GET, "/api/v1/review-requests/not-a-uuid"),
        (Method::POST, "/api/v1/review-requests/not-a-uuid/send"),
        (Method::DELETE, "/api/v1/review-requests/42"),
    ] {
        let (status, body) = app.request(method, uri, Some(&key), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "validation_failed");
        assert!(body["error"]["fields"]["id"].is_array());
    }
}
