//! Review Desk - multi-tenant review request service.
//!
//! Businesses send review requests to their customers, customers answer
//! through tokenized links, and every write lands in an immutable audit trail.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries), or an in-memory store
//! - **Authentication**: API key with SHA-256 hashing and per-key permissions
//! - **Format**: JSON requests/responses

pub mod audit;
pub mod background;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod links;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod policy;
pub mod repositories;
pub mod router;
pub mod services;
pub mod state;
pub mod validation;
