//! Shared application state handed to handlers, services and workers.

use std::sync::Arc;

use crate::audit::AuditedStore;
use crate::config::Config;
use crate::error::AppError;
use crate::links::Links;
use crate::notifications::Notifier;
use crate::repositories::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Always audited: every write goes through [`AuditedStore`].
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub links: Links,
}

impl AppState {
    /// Wraps `store` in the audit decorator.
    ///
    /// # Errors
    ///
    /// Returns an error if `APP_URL` or `APP_KEY` cannot be used to build links.
    pub fn new<S: Store + 'static>(
        config: Config,
        store: S,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let links = Links::new(&config.app_url, &config.app_key)?;
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(AuditedStore::new(store)),
            notifier,
            links,
        })
    }
}
