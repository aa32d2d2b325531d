//! Review request lifecycle: create, reschedule, send now, delete, and the
//! deferred dispatch and expiry transitions driven by the background workers.
//!
//! Every operator action is authorized through [`policy::authorize`] against the
//! request's owning business. Unknown ids and ids of other businesses produce
//! the same generic rejection.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::AppError;
use crate::models::customer::{Customer, CustomerResponse};
use crate::models::dispatch_task::DispatchTask;
use crate::models::feedback::FeedbackResponse;
use crate::models::pagination::{PageRequest, Paginated};
use crate::models::review_request::{
    CreateReviewRequest, CustomerTarget, Delivery, DeliveryPlan, ReviewRequest,
    ReviewRequestQuery, ReviewRequestResponse,
};
use crate::notifications::Notification;
use crate::policy::{self, Permission, Principal, Resource};
use crate::repositories::{Change, DeliveryUpdate};
use crate::state::AppState;
use crate::links;

/// Sweep batch size.
const EXPIRY_BATCH: i64 = 500;

fn respond(state: &AppState, request: ReviewRequest) -> ReviewRequestResponse {
    let review_url = state.links.review_url(&request.unique_token);
    ReviewRequestResponse::new(request, review_url)
}

/// Load a request and check `permission` against its owner.
async fn load_authorized(
    state: &AppState,
    principal: &Principal,
    permission: Permission,
    id: Uuid,
) -> Result<ReviewRequest, AppError> {
    let request = state.store.find_review_request(id).await?;
    let resource = request
        .as_ref()
        .map_or(Resource::Missing, |r| Resource::OwnedBy(r.business_id));
    policy::authorize(principal, permission, resource).into_result()?;
    request.ok_or(AppError::Forbidden)
}

/// Explains why a guarded update matched no row.
async fn rejection(state: &AppState, id: Uuid, now: DateTime<Utc>) -> AppError {
    match state.store.find_review_request(id).await {
        Ok(Some(current)) => {
            current.ensure_sendable(now).err().unwrap_or_else(|| {
                AppError::BusinessRule("The review request changed concurrently; retry".to_string())
            })
        }
        Ok(None) => AppError::Forbidden,
        Err(e) => e,
    }
}

/// Resolve the target customer, creating it from inline data if needed.
async fn resolve_customer(
    state: &AppState,
    principal: &Principal,
    target: CustomerTarget,
    now: DateTime<Utc>,
    ctx: &AuditContext,
) -> Result<Customer, AppError> {
    match target {
        CustomerTarget::Existing(id) => state
            .store
            .find_customer(id)
            .await?
            .filter(|c| c.business_id == principal.business_id)
            .ok_or_else(|| AppError::field("customer_id", "The selected customer id is invalid.")),
        CustomerTarget::Inline(details) => {
            let candidate = Customer::new(principal.business_id, details, now);
            let (customer, created) = state.store.first_or_create_customer(&candidate, ctx).await?;
            if created {
                tracing::info!(customer_id = %customer.id, business_id = %customer.business_id, "customer created inline");
            }
            Ok(customer)
        }
    }
}

/// Hand a sent request to the notification boundary. Failures are logged only.
pub async fn notify_customer(state: &AppState, request: &ReviewRequest) {
    if let Err(e) = hand_over(state, request).await {
        tracing::error!(review_request_id = %request.id, error = %e, "failed to dispatch review request");
    }
}

async fn hand_over(state: &AppState, request: &ReviewRequest) -> Result<(), AppError> {
    let notification = build_notification(state, request).await?;
    state.notifier.dispatch(notification).await
}

async fn build_notification(
    state: &AppState,
    request: &ReviewRequest,
) -> Result<Notification, AppError> {
    let customer = state
        .store
        .find_customer(request.customer_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("customer {} missing", request.customer_id)))?;
    let business = state
        .store
        .find_business(request.business_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("business {} missing", request.business_id)))?;

    Ok(Notification::ReviewRequest {
        review_request_id: request.id,
        business_name: business.name,
        customer_name: customer.name,
        customer_email: customer.email,
        subject: request.subject.clone(),
        message: request.message.clone(),
        review_url: state.links.review_url(&request.unique_token),
        opt_out_url: state.links.opt_out_url(&request.unique_token),
    })
}

/// `GET /review-requests`
pub async fn list(
    state: &AppState,
    principal: &Principal,
    query: ReviewRequestQuery,
) -> Result<Paginated<ReviewRequestResponse>, AppError> {
    policy::authorize(principal, Permission::ReviewRequestsRead, Resource::Collection)
        .into_result()?;
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.per_page);

    let page = state
        .store
        .list_review_requests(principal.business_id, filter, page)
        .await?;
    Ok(page.map(|request| respond(state, request)).into())
}

/// Create a review request.
///
/// # Process
///
/// 1. Resolve the customer (existing id within the business, or upsert by email)
/// 2. Reject opted-out customers
/// 3. Plan delivery: send now, defer to `scheduled_at`, or wait for a manual send
/// 4. Persist the request, the counter increment and the deferred task together
/// 5. Dispatch immediately when sent now
///
/// # Errors
///
/// - `MissingPermission`: key lacks `review-requests.create`
/// - `Validation`: unknown customer id
/// - `BusinessRule`: customer opted out
pub async fn create(
    state: &AppState,
    principal: &Principal,
    ctx: &AuditContext,
    command: CreateReviewRequest,
) -> Result<ReviewRequestResponse, AppError> {
    policy::authorize(principal, Permission::ReviewRequestsCreate, Resource::Collection)
        .into_result()?;
    let now = Utc::now();

    let customer = resolve_customer(state, principal, command.customer, now, ctx).await?;
    if customer.opted_out {
        return Err(AppError::customer_opted_out());
    }

    let plan = DeliveryPlan::for_delivery(command.delivery, now, state.config.review_request_ttl());
    let request = ReviewRequest::new(
        principal.business_id,
        customer.id,
        command.subject,
        command.message,
        links::generate_token(),
        &plan,
        now,
    );
    let task = plan
        .deferred_until()
        .map(|at| DispatchTask::new(request.id, at, now));

    let request = state
        .store
        .create_review_request(&request, task.as_ref(), ctx)
        .await?;
    tracing::info!(
        review_request_id = %request.id,
        business_id = %request.business_id,
        send_mode = %request.send_mode,
        "review request created"
    );

    if request.sent_at.is_some() {
        notify_customer(state, &request).await;
    }

    let customer = state
        .store
        .find_customer(customer.id)
        .await?
        .unwrap_or(customer);
    Ok(respond(state, request).with_customer(CustomerResponse::from(customer)))
}

/// `GET /review-requests/{id}` with customer and feedback loaded.
pub async fn show(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> Result<ReviewRequestResponse, AppError> {
    let request = load_authorized(state, principal, Permission::ReviewRequestsRead, id).await?;

    let customer = state.store.find_customer(request.customer_id).await?;
    let feedback = state.store.feedback_for_review_request(request.id).await?;

    let mut response = respond(state, request)
        .with_feedback(feedback.into_iter().map(FeedbackResponse::from).collect());
    if let Some(customer) = customer {
        response = response.with_customer(customer.into());
    }
    Ok(response)
}

/// Reschedule an unsent request. Choosing `now` sends it like [`send_now`].
///
/// # Errors
///
/// - `BusinessRule`: already sent or expired
pub async fn update(
    state: &AppState,
    principal: &Principal,
    ctx: &AuditContext,
    id: Uuid,
    delivery: Delivery,
) -> Result<ReviewRequestResponse, AppError> {
    let request = load_authorized(state, principal, Permission::ReviewRequestsUpdate, id).await?;
    if delivery == Delivery::Now {
        return send(state, ctx, request).await;
    }

    let now = Utc::now();
    request.ensure_sendable(now)?;
    let plan = DeliveryPlan::for_delivery(delivery, now, state.config.review_request_ttl());
    let task = plan
        .deferred_until()
        .map(|at| DispatchTask::new(request.id, at, now));
    let update = DeliveryUpdate {
        plan,
        task,
        now,
    };

    let Some(Change { after, .. }) = state
        .store
        .update_review_request_delivery(id, &update, ctx)
        .await?
    else {
        return Err(rejection(state, id, now).await);
    };

    tracing::info!(
        review_request_id = %after.id,
        send_mode = %after.send_mode,
        scheduled_at = ?after.scheduled_at,
        "review request rescheduled"
    );
    Ok(respond(state, after))
}

/// `POST /review-requests/{id}/send`
///
/// # Errors
///
/// - `BusinessRule`: already sent or expired
pub async fn send_now(
    state: &AppState,
    principal: &Principal,
    ctx: &AuditContext,
    id: Uuid,
) -> Result<ReviewRequestResponse, AppError> {
    let request = load_authorized(state, principal, Permission::ReviewRequestsSend, id).await?;
    send(state, ctx, request).await
}

async fn send(
    state: &AppState,
    ctx: &AuditContext,
    request: ReviewRequest,
) -> Result<ReviewRequestResponse, AppError> {
    let now = Utc::now();
    request.ensure_sendable(now)?;

    let update = DeliveryUpdate {
        plan: DeliveryPlan::sent_at(now, state.config.review_request_ttl()),
        task: None,
        now,
    };
    let Some(Change { after, .. }) = state
        .store
        .update_review_request_delivery(request.id, &update, ctx)
        .await?
    else {
        return Err(rejection(state, request.id, now).await);
    };

    tracing::info!(review_request_id = %after.id, business_id = %after.business_id, "review request sent");
    notify_customer(state, &after).await;
    Ok(respond(state, after))
}

/// `DELETE /review-requests/{id}`. Customer counters are left unchanged.
pub async fn delete(
    state: &AppState,
    principal: &Principal,
    ctx: &AuditContext,
    id: Uuid,
) -> Result<(), AppError> {
    load_authorized(state, principal, Permission::ReviewRequestsDelete, id).await?;
    state
        .store
        .delete_review_request(id, ctx)
        .await?
        .ok_or(AppError::Forbidden)?;
    tracing::info!(review_request_id = %id, "review request deleted");
    Ok(())
}

/// Outcome of one deferred dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Deleted, already sent, rescheduled or expired meanwhile.
    Skipped,
}

/// Execute a deferred send. Re-checks the request and no-ops when the task is stale.
///
/// A notification that cannot be handed over fails the task so it is retried. The
/// retry finds the request already marked sent by this task and only re-notifies.
pub async fn dispatch_scheduled(
    state: &AppState,
    task: &DispatchTask,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, AppError> {
    let ctx = AuditContext::system();
    let expires_at = now + state.config.review_request_ttl();
    let change = state
        .store
        .mark_review_request_sent(task.review_request_id, task.scheduled_for, now, expires_at, &ctx)
        .await?;

    let request = match change {
        Some(Change { after, .. }) => {
            tracing::info!(review_request_id = %after.id, "scheduled review request sent");
            after
        }
        None => match state.store.find_review_request(task.review_request_id).await? {
            Some(request) if task.attempts > 1 && sent_by(&request, task) => {
                tracing::info!(review_request_id = %request.id, "retrying review request notification");
                request
            }
            _ => {
                tracing::info!(review_request_id = %task.review_request_id, "dispatch task no longer applies");
                return Ok(DispatchOutcome::Skipped);
            }
        },
    };

    hand_over(state, &request).await?;
    Ok(DispatchOutcome::Sent)
}

/// The request was delivered by `task` and is still waiting for an answer.
fn sent_by(request: &ReviewRequest, task: &DispatchTask) -> bool {
    request.sent_at.is_some()
        && request.scheduled_at == Some(task.scheduled_for)
        && request.status.is_open()
}

/// Expire every overdue open request. Returns how many were expired.
pub async fn expire_overdue(state: &AppState, now: DateTime<Utc>) -> Result<usize, AppError> {
    let ctx = AuditContext::system();
    let mut total = 0;
    loop {
        let expired = state
            .store
            .expire_overdue_review_requests(now, EXPIRY_BATCH, &ctx)
            .await?;
        total += expired.len();
        if (expired.len() as i64) < EXPIRY_BATCH {
            break;
        }
    }
    if total > 0 {
        tracing::info!(count = total, "expired overdue review requests");
    }
    Ok(total)
}
