mod payload;

pub use payload::{MessageKind, Payload, PayloadInput};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    conversations::ConversationStore,
    db::{self, RetryPolicy},
    ids::{parse_column, ConversationId, MessageId, UserId},
    page::{Cursor, Page, PageRequest},
    status::DeliveryStatus,
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(flatten)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(skip)]
    seq: i64,
}

impl Message {
    /// Insertion sequence; breaks ties between equal timestamps.
    pub(crate) fn seq(&self) -> i64 {
        self.seq
    }

    fn cursor(&self) -> Cursor {
        Cursor { at: self.created_at.timestamp_micros(), seq: self.seq }
    }
}

#[cfg(test)]
impl Message {
    /// A message that was never stored.
    pub(crate) fn detached(payload: Payload) -> Self {
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            payload,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            seq: 0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    conversation_id: String,
    sender_id: String,
    receiver_id: String,
    kind: String,
    body: Option<String>,
    media_url: Option<String>,
    created_at: i64,
    status: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> AppResult<Self> {
        let payload = Payload::from_parts(row.kind.parse()?, row.body, row.media_url)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("stored message {} is malformed: {e}", row.id)))?;

        Ok(Message {
            id: parse_column(&row.id)?,
            conversation_id: parse_column(&row.conversation_id)?,
            sender_id: parse_column(&row.sender_id)?,
            receiver_id: parse_column(&row.receiver_id)?,
            payload,
            created_at: db::to_datetime(row.created_at)?,
            status: row.status.parse()?,
            seq: row.seq,
        })
    }
}

const COLUMNS: &str =
    "seq, id, conversation_id, sender_id, receiver_id, kind, body, media_url, created_at, status";

#[derive(Clone)]
pub struct MessageStore {
    db_pool: SqlitePool,
    conversations: ConversationStore,
    retry: RetryPolicy,
}

impl MessageStore {
    pub fn new(db_pool: SqlitePool, conversations: ConversationStore, retry: RetryPolicy) -> Self {
        Self { db_pool, conversations, retry }
    }

    /// Stores a new message with status `sent`. The timestamp is clamped so
    /// it never sorts before an earlier message of the same conversation.
    pub async fn append(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        payload: Payload,
    ) -> AppResult<Message> {
        let conversation = self.conversations.get(conversation_id).await?;
        let receiver_id = conversation
            .peer_of(sender_id)
            .ok_or(AppError::NotAParticipant(sender_id))?;

        let sql = format!(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, kind, body, media_url, created_at, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, \
                MAX(?, COALESCE((SELECT MAX(created_at) FROM messages WHERE conversation_id=?), 0)), 'sent') \
             RETURNING {COLUMNS}"
        );
        let (sql, db_pool, payload_ref) = (sql.as_str(), &self.db_pool, &payload);
        let id = MessageId::new();
        let conversation = conversation_id.to_string();
        let conversation = conversation.as_str();

        let row: MessageRow = self
            .retry
            .run("append_message", move || async move {
                let (body, media_url) = payload_ref.columns();
                Ok(sqlx::query_as(sql)
                    .bind(id.to_string())
                    .bind(conversation)
                    .bind(sender_id.to_string())
                    .bind(receiver_id.to_string())
                    .bind(payload_ref.kind().as_str())
                    .bind(body)
                    .bind(media_url)
                    .bind(db::now_micros())
                    .bind(conversation)
                    .fetch_one(db_pool)
                    .await?)
            })
            .await?;

        let message = Message::try_from(row)?;
        tracing::debug!(
            message_id = %message.id,
            %conversation_id,
            kind = %message.payload.kind(),
            "message stored"
        );
        Ok(message)
    }

    pub async fn get(&self, id: MessageId) -> AppResult<Message> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM messages WHERE id=?"))
                .bind(id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;

        row.ok_or(AppError::NotFound("message"))?.try_into()
    }

    /// History in creation order, oldest first, starting after the cursor.
    pub async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
        request: &PageRequest,
        limit: u32,
    ) -> AppResult<Page<Message>> {
        self.conversations.get(conversation_id).await?;

        let (after_at, after_seq) = match request.cursor {
            Some(Cursor { at, seq }) => (Some(at), Some(seq)),
            None => (None, None),
        };

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages \
             WHERE conversation_id=? \
               AND (? IS NULL OR created_at > ? OR (created_at = ? AND seq > ?)) \
             ORDER BY created_at ASC, seq ASC LIMIT ?"
        ))
        .bind(conversation_id.to_string())
        .bind(after_at)
        .bind(after_at)
        .bind(after_at)
        .bind(after_seq)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.db_pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::from_overfetch(items, limit, Message::cursor))
    }
}
