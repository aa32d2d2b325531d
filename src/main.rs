//! Review Desk - Main Application Entry Point
//!
//! REST API server through which businesses send review requests to their
//! customers and moderate the feedback that comes back.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Start the notification delivery task and the background workers
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use review_desk::{
    background,
    config::Config,
    db,
    notifications::{self, HttpMailer, LogMailer, Mailer, QueuedNotifier},
    repositories::PgStore,
    router::create_router,
    state::AppState,
};

/// Notifications buffered between request handlers and the delivery task.
const NOTIFICATION_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let mailer: Arc<dyn Mailer> = match &config.mail_service_url {
        Some(url) => Arc::new(HttpMailer::new(
            url.clone(),
            config.mail_service_token.clone(),
        )?),
        None => {
            tracing::warn!("MAIL_SERVICE_URL not set; notifications will only be logged");
            Arc::new(LogMailer)
        }
    };
    let (notifier, receiver) = QueuedNotifier::channel(NOTIFICATION_QUEUE_CAPACITY);
    tokio::spawn(notifications::run_delivery(receiver, mailer));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let state = AppState::new(config, PgStore::new(pool), Arc::new(notifier))?;

    tokio::spawn(background::run_dispatch_worker(state.clone()));
    tokio::spawn(background::run_expiry_sweep(state.clone()));

    let app = create_router(state);

    // Bind to network address and start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connect info feeds the client IP recorded in the audit trail
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
