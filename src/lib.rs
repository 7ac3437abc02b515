pub mod api;
pub mod appresult;
pub mod config;
pub mod conversations;
pub mod db;
pub mod directory;
pub mod fanout;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod messenger;
pub mod page;
pub mod push;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};
pub use messenger::Messenger;

use crate::{
    config::Config,
    db::RetryPolicy,
    directory::{IdentityDirectory, SqliteDirectory},
    fanout::FanoutRouter,
    messenger::PageLimits,
    push::{LogNotifier, PushNotifier, WebhookNotifier},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub messenger: Messenger,
}

impl AppState {
    /// Wires the stores, router and notifier over an already migrated pool.
    pub fn new(db_pool: SqlitePool, config: &Config) -> Self {
        let directory: Arc<dyn IdentityDirectory> = Arc::new(SqliteDirectory::new(db_pool.clone()));
        let notifier: Arc<dyn PushNotifier> = match &config.push_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), directory.clone())),
            None => Arc::new(LogNotifier),
        };

        let messenger = Messenger::new(
            db_pool.clone(),
            directory,
            Arc::new(FanoutRouter::new()),
            notifier,
            RetryPolicy::with_attempts(config.store_retry_attempts),
            PageLimits::from(config),
        );

        Self { db_pool, messenger }
    }
}
