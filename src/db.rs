use std::{future::Future, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{config::DatabaseConfig, AppError, AppResult};

// users is owned by the identity service; only the columns read here matter.
// Timestamps are unix microseconds. `seq` gives insertion order for tie breaks.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    is_blocked INTEGER NOT NULL DEFAULT 0,
    allow_notifications INTEGER NOT NULL DEFAULT 1,
    push_token TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    pair_key TEXT NOT NULL UNIQUE,
    last_message_id TEXT,
    last_message_at INTEGER,
    last_message_seq INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (participant_a <> participant_b)
);
CREATE INDEX IF NOT EXISTS conversations_a_updated ON conversations (participant_a, updated_at DESC, seq DESC);
CREATE INDEX IF NOT EXISTS conversations_b_updated ON conversations (participant_b, updated_at DESC, seq DESC);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations (id),
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('text', 'image', 'video', 'file')),
    body TEXT,
    media_url TEXT,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read')),
    CHECK (
        (kind = 'text' AND body IS NOT NULL AND media_url IS NULL)
        OR (kind <> 'text' AND media_url IS NOT NULL AND body IS NULL)
    )
);
CREATE INDEX IF NOT EXISTS messages_history ON messages (conversation_id, created_at, seq);
CREATE INDEX IF NOT EXISTS messages_sender ON messages (sender_id);
CREATE INDEX IF NOT EXISTS messages_receiver ON messages (receiver_id, status);
"#;

pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let mut pool = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
    let options = if config.is_in_memory() {
        // every connection to :memory: is its own database, so keep exactly one alive
        pool = pool.max_connections(1).idle_timeout(None).max_lifetime(None);
        options
    } else {
        pool = pool.max_connections(config.max_connections);
        options.journal_mode(SqliteJournalMode::Wal)
    };

    let db_pool = pool.connect_with(options).await?;
    tracing::info!(url = %config.url, "database connected");
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> AppResult<()> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

pub async fn ping(db_pool: &SqlitePool) -> AppResult<()> {
    sqlx::query("SELECT 1").execute(db_pool).await?;
    Ok(())
}

pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Reads back a stored microsecond timestamp.
pub(crate) fn to_datetime(micros: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("corrupt timestamp column {micros}"))
    })
}

/// Bounded retry for store calls that fail on a busy or locked database.
/// Anything not [`AppError::is_retryable`](crate::AppError::is_retryable)
/// is returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self { attempts: attempts.max(1), ..Default::default() }
    }

    pub async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    let delay = jittered(backoff);
                    tracing::warn!(op, attempt, ?delay, error = %err, "store busy, retrying");
                    tokio::time::sleep(delay).await;

                    attempt += 1;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.7..1.3);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn retries_busy_errors_up_to_the_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = fast(3)
            .run("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Database(sqlx::Error::PoolTimedOut)) }
            })
            .await;

        assert!(matches!(result, Err(AppError::Database(sqlx::Error::PoolTimedOut))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_domain_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = fast(5)
            .run("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::NotFound("message")) }
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast(3)
            .run("test", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AppError::Database(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn out_of_range_timestamp_is_an_error() {
        let at = to_datetime(1_700_000_000_123_456).unwrap();
        assert_eq!(at.timestamp_micros(), 1_700_000_000_123_456);
        assert!(matches!(to_datetime(i64::MAX), Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn schema_applies_twice() {
        let db_pool = connect(&DatabaseConfig::in_memory()).await.unwrap();
        migrate(&db_pool).await.unwrap();
        migrate(&db_pool).await.unwrap();
        ping(&db_pool).await.unwrap();
    }
}
