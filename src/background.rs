//! Background workers: deferred dispatch and the expiry sweep.
//!
//! Both loops are plain `tokio` tasks spawned from `main`. Each iteration is a
//! public function taking an explicit `now`, so it can be driven directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};

use crate::error::AppError;
use crate::services::review_request_service::{self, DispatchOutcome};
use crate::state::AppState;

/// Tasks claimed per worker iteration.
const CLAIM_BATCH: i64 = 50;

/// Summary of one dispatch iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Claim and execute every dispatch task due at `now`.
pub async fn process_due_tasks(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<DispatchReport, AppError> {
    let lease = state.config.dispatch_lease();
    let tasks = state
        .store
        .claim_due_dispatch_tasks(now, lease, CLAIM_BATCH)
        .await?;

    let mut report = DispatchReport::default();
    for task in tasks {
        let span = info_span!(
            "dispatch_task",
            task_id = %task.id,
            review_request_id = %task.review_request_id,
            attempt = task.attempts
        );

        async {
            match review_request_service::dispatch_scheduled(state, &task, now).await {
                Ok(outcome) => {
                    match outcome {
                        DispatchOutcome::Sent => report.sent += 1,
                        DispatchOutcome::Skipped => report.skipped += 1,
                    }
                    if let Err(e) = state.store.complete_dispatch_task(task.id).await {
                        error!("Failed to mark dispatch task as completed: {:?}", e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    error!("Dispatch task failed: {}", message);
                    if let Err(up_err) = state.store.fail_dispatch_task(task.id, &message, now).await {
                        error!("Failed to record dispatch failure: {:?}", up_err);
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }

    Ok(report)
}

/// Deferred dispatch loop. Never returns.
pub async fn run_dispatch_worker(state: AppState) {
    info!("Starting deferred dispatch worker...");
    let interval = Duration::from_secs(state.config.worker_poll_seconds);

    loop {
        match process_due_tasks(&state, Utc::now()).await {
            Ok(report) if report != DispatchReport::default() => {
                info!(
                    sent = report.sent,
                    skipped = report.skipped,
                    failed = report.failed,
                    "dispatch iteration finished"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Failed to claim dispatch tasks: {:?}", e),
        }
        sleep(interval).await;
    }
}

/// Expiry sweep loop. Never returns.
pub async fn run_expiry_sweep(state: AppState) {
    info!("Starting review request expiry sweep...");
    let interval = Duration::from_secs(state.config.expiry_sweep_seconds);

    loop {
        if let Err(e) = review_request_service::expire_overdue(&state, Utc::now())
            .instrument(info_span!("expiry_sweep"))
            .await
        {
            error!("Expiry sweep failed: {:?}", e);
        }
        sleep(interval).await;
    }
}
