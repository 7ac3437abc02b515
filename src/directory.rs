use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{ids::UserId, AppResult};

/// What the identity service knows about a user that matters for messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub exists: bool,
    pub is_blocked: bool,
}

impl Resolution {
    pub fn can_converse(&self) -> bool {
        self.exists && !self.is_blocked
    }
}

/// Read-mostly view of the identity service's user records.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve_user(&self, id: UserId) -> AppResult<Resolution>;

    /// Stores (or clears, with `None`) the device token used for push.
    async fn record_push_token(&self, id: UserId, token: Option<String>) -> AppResult<()>;

    /// Token to push to, if the user has one and allows notifications.
    async fn push_token(&self, id: UserId) -> AppResult<Option<String>>;
}

/// Directory backed by the shared `users` table.
#[derive(Clone)]
pub struct SqliteDirectory {
    db_pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl IdentityDirectory for SqliteDirectory {
    async fn resolve_user(&self, id: UserId) -> AppResult<Resolution> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_blocked FROM users WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(match row {
            Some((is_blocked,)) => Resolution { exists: true, is_blocked },
            None => Resolution::default(),
        })
    }

    async fn record_push_token(&self, id: UserId, token: Option<String>) -> AppResult<()> {
        let updated = sqlx::query("UPDATE users SET push_token=? WHERE id=?")
            .bind(token.as_deref())
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(crate::AppError::NotFound("user"));
        }

        tracing::debug!(user_id = %id, cleared = token.is_none(), "push token recorded");
        Ok(())
    }

    async fn push_token(&self, id: UserId) -> AppResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT push_token FROM users WHERE id=? AND allow_notifications=1 AND is_blocked=0",
        )
        .bind(id.to_string())
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.and_then(|(token,)| token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn resolves_known_blocked_and_missing_users() {
        let db_pool = testing::pool().await;
        let alice = testing::user(&db_pool).await;
        let mallory = testing::blocked_user(&db_pool).await;
        let directory = SqliteDirectory::new(db_pool);

        assert_eq!(
            directory.resolve_user(alice).await.unwrap(),
            Resolution { exists: true, is_blocked: false }
        );
        assert!(!directory.resolve_user(mallory).await.unwrap().can_converse());
        assert!(!directory.resolve_user(UserId::new()).await.unwrap().exists);
    }

    #[tokio::test]
    async fn push_token_respects_notification_preference() {
        let db_pool = testing::pool().await;
        let alice = testing::user(&db_pool).await;
        let directory = SqliteDirectory::new(db_pool.clone());

        assert_eq!(directory.push_token(alice).await.unwrap(), None);

        directory.record_push_token(alice, Some("tok-1".into())).await.unwrap();
        assert_eq!(directory.push_token(alice).await.unwrap().as_deref(), Some("tok-1"));

        sqlx::query("UPDATE users SET allow_notifications=0 WHERE id=?")
            .bind(alice.to_string())
            .execute(&db_pool)
            .await
            .unwrap();
        assert_eq!(directory.push_token(alice).await.unwrap(), None);
    }

    #[tokio::test]
    async fn recording_token_for_unknown_user_fails() {
        let directory = SqliteDirectory::new(testing::pool().await);
        let err = directory
            .record_push_token(UserId::new(), Some("tok".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::AppError::NotFound("user")));
    }
}
