//! Operator tooling: provision tenants, operator accounts and API keys, and run
//! one-off maintenance against the configured database.
//!
//! Every write goes through the audited store with the system actor.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::ValidateEmail;

use review_desk::{
    audit::AuditContext,
    config::Config,
    db,
    models::{business::Business, customer::normalize_email, user::User},
    notifications::{self, LogMailer, QueuedNotifier},
    policy::Permission,
    repositories::PgStore,
    services::{api_key_service, review_request_service},
    state::AppState,
};

#[derive(Parser, Debug)]
#[command(name = "provision", version, about = "Review Desk provisioning tool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage businesses (tenants)
    #[command(subcommand)]
    Business(BusinessCommand),

    /// Manage operator accounts
    #[command(subcommand)]
    Operator(OperatorCommand),

    /// Manage API keys
    #[command(subcommand)]
    ApiKey(ApiKeyCommand),

    /// Expire every overdue review request once and exit
    Expire,
}

#[derive(Subcommand, Debug)]
enum BusinessCommand {
    Create {
        #[arg(long)]
        name: String,

        /// Address notified of new feedback
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand, Debug)]
enum OperatorCommand {
    Create {
        #[arg(long)]
        business: Option<Uuid>,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        /// Read from `OPERATOR_PASSWORD` when omitted
        #[arg(long, env = "OPERATOR_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Subcommand, Debug)]
enum ApiKeyCommand {
    /// Issue a key. The plaintext is printed once.
    Issue {
        #[arg(long)]
        business: Uuid,

        #[arg(long)]
        name: String,

        /// Comma-separated, e.g. `review-requests.read,review-requests.create`
        #[arg(long, value_delimiter = ',', required = true)]
        permissions: Vec<Permission>,

        /// Key stops working after this many days
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    Revoke {
        id: Uuid,
    },
    Restore {
        id: Uuid,
    },
}

/// Expiry `days` after `now`, refusing values chrono cannot represent.
fn expiry_after(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days < 1 {
        bail!("--expires-in-days must be at least 1");
    }
    Duration::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .ok_or_else(|| anyhow!("--expires-in-days {days} is out of range"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let (notifier, receiver) = QueuedNotifier::channel(16);
    tokio::spawn(notifications::run_delivery(receiver, Arc::new(LogMailer)));
    let state = AppState::new(config, PgStore::new(pool), Arc::new(notifier))?;

    let ctx = AuditContext::system().with_tag("provision");

    match args.command {
        Command::Business(BusinessCommand::Create { name, email }) => {
            if !email.validate_email() {
                bail!("{email} is not a valid email address");
            }
            let business = Business::new(name, normalize_email(&email), Utc::now());
            let business = state.store.insert_business(&business, &ctx).await?;
            println!("business {} created", business.id);
        }
        Command::Operator(OperatorCommand::Create {
            business,
            name,
            email,
            password,
        }) => {
            if !email.validate_email() {
                bail!("{email} is not a valid email address");
            }
            if password.len() < 8 {
                bail!("password must be at least 8 characters");
            }
            if let Some(id) = business {
                if state.store.find_business(id).await?.is_none() {
                    bail!("business {id} does not exist");
                }
            }

            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4(),
                business_id: business,
                name,
                email: normalize_email(&email),
                password_hash: hash_password(&password)?,
                remember_token: None,
                created_at: now,
                updated_at: now,
            };
            let user = state.store.insert_user(&user, &ctx).await?;
            println!("operator {} created", user.id);
        }
        Command::ApiKey(ApiKeyCommand::Issue {
            business,
            name,
            permissions,
            expires_in_days,
        }) => {
            let expires_at = expires_in_days
                .map(|days| expiry_after(Utc::now(), days))
                .transpose()?;
            let issued = api_key_service::issue(
                state.store.as_ref(),
                business,
                &name,
                &permissions,
                expires_at,
                &ctx,
            )
            .await?;
            println!("api key {} issued", issued.key.id);
            println!("{}", issued.plaintext);
            eprintln!("store this key now; it cannot be shown again");
        }
        Command::ApiKey(ApiKeyCommand::Revoke { id }) => {
            match api_key_service::revoke(state.store.as_ref(), id, &ctx).await? {
                Some(_) => println!("api key {id} revoked"),
                None => bail!("api key {id} not found or already revoked"),
            }
        }
        Command::ApiKey(ApiKeyCommand::Restore { id }) => {
            match api_key_service::restore(state.store.as_ref(), id, &ctx).await? {
                Some(_) => println!("api key {id} restored"),
                None => bail!("api key {id} not found or already active"),
            }
        }
        Command::Expire => {
            let expired = review_request_service::expire_overdue(&state, Utc::now()).await?;
            println!("{expired} review request(s) expired");
        }
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))
}
