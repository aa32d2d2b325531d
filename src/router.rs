//! HTTP routing table.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::{auth::require_api_key, request_meta::capture_request_meta};
use crate::state::AppState;

/// Build the application router.
///
/// - `/api/v1/*` requires an API key
/// - `/r/*` is reachable with a review request token only
/// - `/health` is open
pub fn create_router(state: AppState) -> Router {
    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/review-requests",
            get(handlers::review_requests::list_review_requests)
                .post(handlers::review_requests::create_review_request),
        )
        .route(
            "/api/v1/review-requests/{id}",
            get(handlers::review_requests::get_review_request)
                .put(handlers::review_requests::update_review_request)
                .delete(handlers::review_requests::delete_review_request),
        )
        .route(
            "/api/v1/review-requests/{id}/send",
            post(handlers::review_requests::send_review_request),
        )
        .route("/api/v1/feedback", get(handlers::feedback::list_feedback))
        .route(
            "/api/v1/feedback/{id}",
            patch(handlers::feedback::update_feedback),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    // Customer-facing links
    let public_routes = Router::new()
        .route("/r/{token}", get(handlers::public::view_review_request))
        .route(
            "/r/{token}/feedback",
            post(handlers::public::submit_feedback),
        )
        .route(
            "/r/{token}/opt-out",
            get(handlers::public::opt_out).post(handlers::public::opt_out),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(public_routes)
        .merge(authenticated_routes)
        // Request metadata is captured before authentication so the key's last-used IP is known
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(capture_request_meta)),
        )
        .with_state(state)
}
