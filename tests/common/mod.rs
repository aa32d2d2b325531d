#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use review_desk::{
    audit::AuditContext,
    config::Config,
    error::AppError,
    models::{
        api_key::ApiKey, audit_log::AuditLog, business::Business, customer::Customer,
        review_request::ReviewRequest,
    },
    notifications::{Notification, Notifier},
    policy::Permission,
    repositories::MemoryStore,
    router::create_router,
    services::api_key_service,
    state::AppState,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const APP_KEY: &str = "test-app-key";

/// Keeps every notification instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    refusals: Mutex<usize>,
}

impl RecordingNotifier {
    /// Reject the next `count` notifications like a full queue would.
    pub fn refuse_next(&self, count: usize) {
        *self.refusals.lock().unwrap() = count;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn review_requests_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|n| matches!(n, Notification::ReviewRequest { .. }))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), AppError> {
        let mut refusals = self.refusals.lock().unwrap();
        if *refusals > 0 {
            *refusals -= 1;
            return Err(AppError::Internal("notification queue full".to_string()));
        }
        drop(refusals);
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn new() -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(
            Config::for_local(APP_KEY),
            MemoryStore::new(),
            notifier.clone(),
        )
        .expect("Failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            notifier,
        }
    }

    pub async fn business(&self, name: &str) -> Business {
        let business = Business::new(
            name.to_string(),
            format!("owner@{}.test", name.to_lowercase()),
            Utc::now(),
        );
        self.state
            .store
            .insert_business(&business, &AuditContext::system())
            .await
            .unwrap()
    }

    /// Plaintext key with the given permissions.
    pub async fn key_with(&self, business_id: Uuid, permissions: &[Permission]) -> (ApiKey, String) {
        self.key_expiring(business_id, permissions, None).await
    }

    pub async fn key_expiring(
        &self,
        business_id: Uuid,
        permissions: &[Permission],
        expires_at: Option<DateTime<Utc>>,
    ) -> (ApiKey, String) {
        let issued = api_key_service::issue(
            self.state.store.as_ref(),
            business_id,
            "test key",
            permissions,
            expires_at,
            &AuditContext::system(),
        )
        .await
        .unwrap();
        (issued.key, issued.plaintext)
    }

    /// Plaintext key with every permission.
    pub async fn full_key(&self, business_id: Uuid) -> String {
        self.key_with(business_id, &Permission::ALL).await.1
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        api_key: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("X-API-Key", key);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// `POST /api/v1/review-requests`, asserting 201.
    pub async fn create_request(&self, key: &str, body: Value) -> Value {
        let (status, json) = self
            .request(Method::POST, "/api/v1/review-requests", Some(key), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {json}");
        json
    }

    pub async fn customer(&self, id: Uuid) -> Customer {
        self.state.store.find_customer(id).await.unwrap().unwrap()
    }

    pub async fn review_request(&self, id: Uuid) -> ReviewRequest {
        self.state.store.find_review_request(id).await.unwrap().unwrap()
    }

    pub async fn audit_logs(&self, auditable_type: &str, id: Uuid) -> Vec<AuditLog> {
        self.state
            .store
            .audit_logs_for(auditable_type, id)
            .await
            .unwrap()
    }
}

pub fn id_of(json: &Value, field: &str) -> Uuid {
    json[field].as_str().unwrap().parse().unwrap()
}

/// Token at the end of a `review_url`.
pub fn token_of(json: &Value) -> String {
    json["review_url"]
        .as_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string()
}

pub fn inline_request(email: &str, send_mode: &str) -> Value {
    serde_json::json!({
        "customer": { "name": "Grace Hopper", "email": email },
        "subject": "How did we do?",
        "message": "We would love to hear about your visit.",
        "send_mode": send_mode
    })
}
