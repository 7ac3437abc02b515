use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    db::RetryPolicy,
    ids::{parse_column, ConversationId, MessageId, UserId},
    AppError, AppResult,
};

/// Per-message delivery state. Declaration order is the transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    fn rank(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            other => Err(AppError::Internal(anyhow::anyhow!("unknown delivery status {other:?}"))),
        }
    }
}

/// A transition that actually happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub status: DeliveryStatus,
}

// rank of the stored status, compared against the target's rank
const STORED_RANK: &str = "(CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END)";

#[derive(Clone)]
pub struct StatusEngine {
    db_pool: SqlitePool,
    retry: RetryPolicy,
}

impl StatusEngine {
    pub fn new(db_pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { db_pool, retry }
    }

    /// Moves `message_id` forward to `target`. Returns `None` when the stored
    /// status is already at or past `target`.
    pub async fn advance(
        &self,
        message_id: MessageId,
        target: DeliveryStatus,
    ) -> AppResult<Option<StatusChange>> {
        let sql = format!(
            "UPDATE messages SET status=? WHERE id=? AND {STORED_RANK} < ? \
             RETURNING conversation_id, sender_id"
        );

        let (sql, db_pool) = (sql.as_str(), &self.db_pool);
        let row: Option<(String, String)> = self
            .retry
            .run("advance_status", move || async move {
                Ok(sqlx::query_as(sql)
                    .bind(target.as_str())
                    .bind(message_id.to_string())
                    .bind(target.rank())
                    .fetch_optional(db_pool)
                    .await?)
            })
            .await?;

        let Some((conversation_id, sender_id)) = row else {
            let exists = sqlx::query("SELECT 1 FROM messages WHERE id=?")
                .bind(message_id.to_string())
                .fetch_optional(&self.db_pool)
                .await?
                .is_some();
            if !exists {
                return Err(AppError::NotFound("message"));
            }

            tracing::debug!(%message_id, %target, "status already at or past target");
            return Ok(None);
        };

        tracing::debug!(%message_id, %target, "status advanced");
        Ok(Some(StatusChange {
            message_id,
            conversation_id: parse_column(&conversation_id)?,
            sender_id: parse_column(&sender_id)?,
            status: target,
        }))
    }

    /// Advances every message `receiver` got in the conversation that is
    /// still behind `target`. Returned in sequence order.
    pub async fn advance_conversation(
        &self,
        conversation_id: ConversationId,
        receiver: UserId,
        target: DeliveryStatus,
    ) -> AppResult<Vec<StatusChange>> {
        let sql = format!(
            "UPDATE messages SET status=? \
             WHERE conversation_id=? AND receiver_id=? AND {STORED_RANK} < ? \
             RETURNING seq, id, sender_id"
        );

        let (sql, db_pool) = (sql.as_str(), &self.db_pool);
        let mut rows: Vec<(i64, String, String)> = self
            .retry
            .run("advance_conversation_status", move || async move {
                Ok(sqlx::query_as(sql)
                    .bind(target.as_str())
                    .bind(conversation_id.to_string())
                    .bind(receiver.to_string())
                    .bind(target.rank())
                    .fetch_all(db_pool)
                    .await?)
            })
            .await?;
        rows.sort_by_key(|(seq, _, _)| *seq);

        rows.into_iter()
            .map(|(_, id, sender_id)| {
                Ok(StatusChange {
                    message_id: parse_column(&id)?,
                    conversation_id,
                    sender_id: parse_column(&sender_id)?,
                    status: target,
                })
            })
            .collect()
    }
}
