//! Shared harness: an in-memory database, a couple of users and a
//! notifier that remembers what it was asked to push.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use parley::{
    config::DatabaseConfig,
    db::{self, RetryPolicy},
    directory::{IdentityDirectory, SqliteDirectory},
    fanout::FanoutRouter,
    ids::UserId,
    messenger::PageLimits,
    push::{MessagePreview, PushNotifier},
    AppState, Messenger,
};
use axum::Router;
use sqlx::SqlitePool;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, MessagePreview)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(UserId, MessagePreview)> {
        self.sent.lock().unwrap().clone()
    }
}

impl PushNotifier for RecordingNotifier {
    fn notify(&self, user_id: UserId, preview: MessagePreview) {
        self.sent.lock().unwrap().push((user_id, preview));
    }
}

pub struct TestEnvironment {
    pub db_pool: SqlitePool,
    pub messenger: Messenger,
    pub notifier: Arc<RecordingNotifier>,
    pub alice: UserId,
    pub bob: UserId,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let db_pool = db::connect(&DatabaseConfig::in_memory())
            .await
            .expect("in-memory database");
        db::migrate(&db_pool).await.expect("schema");

        let notifier = Arc::new(RecordingNotifier::default());
        let directory: Arc<dyn IdentityDirectory> = Arc::new(SqliteDirectory::new(db_pool.clone()));
        let messenger = Messenger::new(
            db_pool.clone(),
            directory,
            Arc::new(FanoutRouter::new()),
            notifier.clone(),
            RetryPolicy::with_attempts(3),
            PageLimits::default(),
        );

        let alice = insert_user(&db_pool, false).await;
        let bob = insert_user(&db_pool, false).await;

        Self { db_pool, messenger, notifier, alice, bob }
    }

    /// The full HTTP surface over this environment's database and messenger.
    pub fn app(&self) -> Router {
        parley::api::app(AppState {
            db_pool: self.db_pool.clone(),
            messenger: self.messenger.clone(),
        })
    }

    pub async fn user(&self) -> UserId {
        insert_user(&self.db_pool, false).await
    }

    pub async fn blocked_user(&self) -> UserId {
        insert_user(&self.db_pool, true).await
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.db_pool)
            .await
            .expect("count")
    }
}

async fn insert_user(db_pool: &SqlitePool, is_blocked: bool) -> UserId {
    let id = UserId::new();
    sqlx::query("INSERT INTO users (id, is_blocked) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(is_blocked)
        .execute(db_pool)
        .await
        .expect("insert user");
    id
}
