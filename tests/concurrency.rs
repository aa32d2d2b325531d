mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use common::{TestApp, id_of, inline_request, token_of};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_creates_for_one_customer_count_every_request() {
    let app = Arc::new(TestApp::new());
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            app.create_request(&key, inline_request("grace@example.com", "now"))
                .await
        }));
    }

    let mut customer_ids = Vec::new();
    for handle in handles {
        customer_ids.push(handle.await.unwrap()["customer_id"].clone());
    }
    customer_ids.dedup();
    assert_eq!(customer_ids.len(), 1, "one customer per email");

    let customer_id = customer_ids[0].as_str().unwrap().parse().unwrap();
    let customer = app.customer(customer_id).await;
    assert_eq!(customer.total_requests_sent, 8);
    assert_eq!(app.notifier.review_requests_sent(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_racing_feedback_submissions_wins() {
    let app = Arc::new(TestApp::new());
    let business = app.business("Bakery").await;
    let key = app.full_key(business.id).await;
    let created = app
        .create_request(&key, inline_request("grace@example.com", "now"))
        .await;
    let token = token_of(&created);

    let mut handles = Vec::new();
    for rating in 1..=5 {
        let app = app.clone();
        let uri = format!("/r/{token}/feedback");
        handles.push(tokio::spawn(async move {
            app.request(Method::POST, &uri, None, Some(json!({ "rating": rating })))
                .await
                .0
        }));
    }

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }

    let accepted = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    assert_eq!(accepted, 1);
    assert!(statuses
        .iter()
        .all(|s| *s == StatusCode::CREATED || *s == StatusCode::UNPROCESSABLE_ENTITY));

    let customer = app.customer(id_of(&created, "customer_id")).await;
    assert_eq!(customer.total_feedbacks, 1);
}
