//! `PgStore` against a real PostgreSQL database. Skipped unless `DATABASE_URL`
//! points at one.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use review_desk::{
    audit::{AuditContext, AuditedStore},
    db,
    error::AppError,
    models::{
        business::Business,
        customer::{Customer, NewCustomer},
        dispatch_task::DispatchTask,
        feedback::{Feedback, ModerationStatus},
        review_request::{Delivery, DeliveryPlan, ReviewRequest, Status},
    },
    repositories::{PgStore, Store},
};
use tokio::task::JoinSet;
use uuid::Uuid;

const TTL_DAYS: i64 = 30;

async fn connect() -> Option<Arc<dyn Store>> {
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        println!("Skipping PostgreSQL store test (DATABASE_URL not set)");
        return None;
    };
    if !db_url.starts_with("postgres") {
        println!("Skipping PostgreSQL store test (not targeting Postgres)");
        return None;
    }

    let pool = db::create_pool(&db_url).await.expect("Failed to connect to DB");
    db::run_migrations(&pool).await.expect("Failed to run migrations");
    Some(Arc::new(AuditedStore::new(PgStore::new(pool))))
}

/// Postgres keeps microseconds.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

async fn seed_customer(store: &dyn Store, ctx: &AuditContext) -> Customer {
    let now = now();
    let tag = Uuid::new_v4().simple().to_string();
    let business = Business::new(format!("Bakery {tag}"), format!("owner-{tag}@bakery.test"), now);
    let business = store.insert_business(&business, ctx).await.unwrap();

    let candidate = Customer::new(
        business.id,
        NewCustomer {
            name: "Grace Hopper".into(),
            email: "grace@example.com".into(),
            phone: None,
            company: None,
        },
        now,
    );
    store.first_or_create_customer(&candidate, ctx).await.unwrap().0
}

fn request_for(customer: &Customer, delivery: Delivery, now: DateTime<Utc>) -> ReviewRequest {
    let plan = DeliveryPlan::for_delivery(delivery, now, Duration::days(TTL_DAYS));
    ReviewRequest::new(
        customer.business_id,
        customer.id,
        "How did we do?".into(),
        "We would love to hear about your visit.".into(),
        Uuid::new_v4().simple().to_string(),
        &plan,
        now,
    )
}

fn feedback_for(request: &ReviewRequest, rating: i32, now: DateTime<Utc>) -> Feedback {
    Feedback {
        id: Uuid::new_v4(),
        business_id: request.business_id,
        customer_id: Some(request.customer_id),
        review_request_id: Some(request.id),
        rating,
        comment: None,
        sentiment: None,
        moderation_status: ModerationStatus::Published,
        is_public: true,
        reply: None,
        replied_at: None,
        submitted_at: now,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn parallel_creates_increment_the_counter_once_each() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;

    let creations = 20;
    let mut set = JoinSet::new();
    for _ in 0..creations {
        let store = store.clone();
        let request = request_for(&customer, Delivery::Now, now());
        set.spawn(async move {
            store
                .create_review_request(&request, None, &AuditContext::system())
                .await
                .map(|stored| stored.sent_at)
        });
    }

    let mut latest = None;
    while let Some(res) = set.join_next().await {
        let sent_at = res.unwrap().expect("creation failed");
        latest = latest.max(sent_at);
    }

    let stored = store.find_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(stored.total_requests_sent, creations);
    assert_eq!(stored.last_request_sent_at, latest);
}

#[tokio::test]
async fn scheduled_creation_does_not_record_a_future_send() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;
    let now = now();

    let request = request_for(&customer, Delivery::Scheduled { hours: 720 }, now);
    store.create_review_request(&request, None, &ctx).await.unwrap();

    let stored = store.find_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(stored.last_request_sent_at, Some(now));
}

#[tokio::test]
async fn opted_out_customer_rejects_creation_without_counting() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;
    store.set_customer_opted_out(customer.id, true, &ctx).await.unwrap();

    let err = store
        .create_review_request(&request_for(&customer, Delivery::Now, now()), None, &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BusinessRule(_)));
    let stored = store.find_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(stored.total_requests_sent, 0);
}

#[tokio::test]
async fn feedback_racing_expiry_has_a_single_winner() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;

    for _ in 0..10 {
        let now = now();
        let request = request_for(&customer, Delivery::Now, now);
        store.create_review_request(&request, None, &ctx).await.unwrap();
        let overdue = request.expires_at + Duration::seconds(1);

        let submit = {
            let store = store.clone();
            let feedback = feedback_for(&request, 5, now);
            tokio::spawn(async move {
                store
                    .submit_feedback(&feedback, feedback.review_request_id.unwrap(), &AuditContext::system())
                    .await
            })
        };
        let expire = {
            let store = store.clone();
            let id = request.id;
            tokio::spawn(async move {
                store
                    .expire_review_request(id, overdue, &AuditContext::system())
                    .await
            })
        };

        let submitted = submit.await.unwrap();
        let expired = expire.await.unwrap().unwrap();
        let stored = store.find_review_request(request.id).await.unwrap().unwrap();

        match (submitted, expired) {
            (Ok(_), None) => assert_eq!(stored.status, Status::Completed),
            (Err(AppError::BusinessRule(_)), Some(_)) => assert_eq!(stored.status, Status::Expired),
            (submitted, expired) => panic!(
                "both or neither transition applied: feedback {:?}, expiry {:?}",
                submitted.map(|s| s.feedback.id),
                expired.map(|c| c.after.status)
            ),
        }
    }
}

#[tokio::test]
async fn racing_feedback_submissions_complete_once() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;
    let now = now();
    let request = request_for(&customer, Delivery::Now, now);
    store.create_review_request(&request, None, &ctx).await.unwrap();

    let mut set = JoinSet::new();
    for rating in 1..=5 {
        let store = store.clone();
        let feedback = feedback_for(&request, rating, now);
        set.spawn(async move {
            store
                .submit_feedback(&feedback, feedback.review_request_id.unwrap(), &AuditContext::system())
                .await
                .is_ok()
        });
    }

    let mut accepted = 0;
    while let Some(res) = set.join_next().await {
        if res.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    let stored = store.find_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(stored.total_feedbacks, 1);
    assert_eq!(
        store.find_review_request(request.id).await.unwrap().unwrap().status,
        Status::Completed
    );
}

#[tokio::test]
async fn concurrent_workers_claim_each_task_once() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;
    let now = now();

    let mut ours = HashSet::new();
    for _ in 0..30 {
        let request = request_for(&customer, Delivery::Scheduled { hours: 1 }, now);
        let task = DispatchTask::new(request.id, request.scheduled_at.unwrap(), now);
        ours.insert(task.id);
        store.create_review_request(&request, Some(&task), &ctx).await.unwrap();
    }

    let due = now + Duration::hours(2);
    let mut set = JoinSet::new();
    for _ in 0..6 {
        let store = store.clone();
        set.spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = store
                    .claim_due_dispatch_tasks(due, Duration::minutes(5), 4)
                    .await
                    .expect("Failed to claim tasks");
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|task| task.id));
            }
            claimed
        });
    }

    let mut seen = HashSet::new();
    while let Some(res) = set.join_next().await {
        for id in res.unwrap() {
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }
    assert!(ours.is_subset(&seen));
}

#[tokio::test]
async fn completed_request_is_never_expired() {
    let Some(store) = connect().await else { return };
    let ctx = AuditContext::system();
    let customer = seed_customer(store.as_ref(), &ctx).await;
    let now = now();
    let request = request_for(&customer, Delivery::Now, now);
    store.create_review_request(&request, None, &ctx).await.unwrap();
    store
        .submit_feedback(&feedback_for(&request, 4, now), request.id, &ctx)
        .await
        .unwrap();

    let later = now + Duration::days(TTL_DAYS * 2);
    assert!(store.expire_review_request(request.id, later, &ctx).await.unwrap().is_none());
    assert_eq!(
        store.find_review_request(request.id).await.unwrap().unwrap().status,
        Status::Completed
    );
}
