use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{stream, Stream, TryStreamExt};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    db::{self, RetryPolicy},
    directory::IdentityDirectory,
    ids::{parse_column, ConversationId, MessageId, UserId},
    messages::Message,
    page::{Cursor, Page, PageRequest},
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// In the order the first message went.
    pub participants: [UserId; 2],
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    seq: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// The other participant, or `None` if `user_id` is not in the pair.
    pub fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor { at: self.updated_at.timestamp_micros(), seq: self.seq }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    seq: i64,
    id: String,
    participant_a: String,
    participant_b: String,
    last_message_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = AppError;

    fn try_from(row: ConversationRow) -> AppResult<Self> {
        Ok(Conversation {
            id: parse_column(&row.id)?,
            participants: [parse_column(&row.participant_a)?, parse_column(&row.participant_b)?],
            last_message_id: row.last_message_id.as_deref().map(parse_column).transpose()?,
            created_at: db::to_datetime(row.created_at)?,
            updated_at: db::to_datetime(row.updated_at)?,
            seq: row.seq,
        })
    }
}

const COLUMNS: &str =
    "seq, id, participant_a, participant_b, last_message_id, created_at, updated_at";

/// Same key for (a, b) and (b, a).
fn pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[derive(Clone)]
pub struct ConversationStore {
    db_pool: SqlitePool,
    directory: Arc<dyn IdentityDirectory>,
    retry: RetryPolicy,
}

impl ConversationStore {
    pub fn new(db_pool: SqlitePool, directory: Arc<dyn IdentityDirectory>, retry: RetryPolicy) -> Self {
        Self { db_pool, directory, retry }
    }

    pub async fn get(&self, id: ConversationId) -> AppResult<Conversation> {
        let row: Option<ConversationRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM conversations WHERE id=?"))
                .bind(id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;

        row.ok_or(AppError::ConversationNotFound(id))?.try_into()
    }

    /// Returns the conversation for the unordered pair, creating it on first
    /// contact. Racing callers converge on the row that won the unique
    /// `pair_key` insert.
    pub async fn find_or_create(&self, a: UserId, b: UserId) -> AppResult<Conversation> {
        if a == b {
            return Err(AppError::SelfConversation);
        }
        for user_id in [a, b] {
            if !self.directory.resolve_user(user_id).await?.can_converse() {
                return Err(AppError::InvalidParticipant(user_id));
            }
        }

        let key = pair_key(a, b);
        for attempt in 1..=self.retry.attempts.max(2) {
            if let Some(existing) = self.find_by_pair(&key).await? {
                return Ok(existing);
            }

            if let Some(created) = self.try_create(a, b, &key).await? {
                tracing::info!(conversation_id = %created.id, %a, %b, "conversation created");
                return Ok(created);
            }

            tracing::debug!(%a, %b, attempt, "lost conversation creation race, re-reading");
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "conversation for {key} neither found nor created"
        )))
    }

    async fn find_by_pair(&self, key: &str) -> AppResult<Option<Conversation>> {
        let sql = format!("SELECT {COLUMNS} FROM conversations WHERE pair_key=?");
        let (sql, db_pool) = (sql.as_str(), &self.db_pool);

        let row: Option<ConversationRow> = self
            .retry
            .run("find_conversation", move || async move {
                Ok(sqlx::query_as(sql).bind(key).fetch_optional(db_pool).await?)
            })
            .await?;

        row.map(Conversation::try_from).transpose()
    }

    /// `None` when another caller inserted the pair first.
    async fn try_create(&self, a: UserId, b: UserId, key: &str) -> AppResult<Option<Conversation>> {
        let sql = format!(
            "INSERT INTO conversations (id, participant_a, participant_b, pair_key, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (pair_key) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let (sql, db_pool) = (sql.as_str(), &self.db_pool);
        let id = ConversationId::new();
        let now = db::now_micros();

        let row: Option<ConversationRow> = self
            .retry
            .run("create_conversation", move || async move {
                Ok(sqlx::query_as(sql)
                    .bind(id.to_string())
                    .bind(a.to_string())
                    .bind(b.to_string())
                    .bind(key)
                    .bind(now)
                    .bind(now)
                    .fetch_optional(db_pool)
                    .await?)
            })
            .await?;

        row.map(Conversation::try_from).transpose()
    }

    /// Points the conversation at `message` and bumps its activity time.
    /// No-op (returns `false`) if the current pointer is already newer.
    pub async fn touch(&self, id: ConversationId, message: &Message) -> AppResult<bool> {
        let at = message.created_at.timestamp_micros();
        let seq = message.seq();
        let message_id = message.id.to_string();
        let db_pool = &self.db_pool;
        let message_id = message_id.as_str();

        let touched = self
            .retry
            .run("touch_conversation", move || async move {
                Ok(sqlx::query(
                    "UPDATE conversations \
                     SET last_message_id=?, last_message_at=?, last_message_seq=?, updated_at=MAX(updated_at, ?) \
                     WHERE id=? AND (last_message_at IS NULL OR last_message_at < ? \
                        OR (last_message_at = ? AND last_message_seq < ?))",
                )
                .bind(message_id)
                .bind(at)
                .bind(seq)
                .bind(at)
                .bind(id.to_string())
                .bind(at)
                .bind(at)
                .bind(seq)
                .execute(db_pool)
                .await?
                .rows_affected())
            })
            .await?;

        if touched == 0 {
            tracing::debug!(conversation_id = %id, %message_id, "stale touch ignored");
        }
        Ok(touched > 0)
    }

    /// Conversations involving `user_id`, most recently active first.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        request: &PageRequest,
        limit: u32,
    ) -> AppResult<Page<Conversation>> {
        let (before_at, before_seq) = match request.cursor {
            Some(Cursor { at, seq }) => (Some(at), Some(seq)),
            None => (None, None),
        };
        let user = user_id.to_string();

        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversations \
             WHERE (participant_a=? OR participant_b=?) \
               AND (? IS NULL OR updated_at < ? OR (updated_at = ? AND seq < ?)) \
             ORDER BY updated_at DESC, seq DESC LIMIT ?"
        ))
        .bind(&user)
        .bind(&user)
        .bind(before_at)
        .bind(before_at)
        .bind(before_at)
        .bind(before_seq)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.db_pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Conversation::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::from_overfetch(items, limit, Conversation::cursor))
    }

    /// Lazily walks every conversation of `user_id`, one page per fetch.
    pub fn stream_for_user(
        &self,
        user_id: UserId,
        page_size: u32,
    ) -> impl Stream<Item = AppResult<Conversation>> + Send + '_ {
        let first = Some(PageRequest::first(page_size));

        stream::try_unfold(first, move |next| async move {
            let Some(request) = next else {
                return Ok(None);
            };
            let page = self.list_for_user(user_id, &request, page_size).await?;
            let next = page.next_cursor.map(|cursor| PageRequest::after(cursor, page_size));
            Ok::<_, AppError>(Some((stream::iter(page.items.into_iter().map(Ok::<_, AppError>)), next)))
        })
        .try_flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{messages::Payload, testing};

    #[tokio::test]
    async fn pair_order_does_not_matter() {
        let fixture = testing::Fixture::new().await;
        let ab = fixture.conversations.find_or_create(fixture.alice, fixture.bob).await.unwrap();
        let ba = fixture.conversations.find_or_create(fixture.bob, fixture.alice).await.unwrap();

        assert_eq!(ab.id, ba.id);
        assert_eq!(ab.participants, [fixture.alice, fixture.bob]);
        assert_eq!(ab.peer_of(fixture.alice), Some(fixture.bob));
        assert_eq!(ab.peer_of(UserId::new()), None);
    }

    #[tokio::test]
    async fn concurrent_first_contact_creates_one_conversation() {
        let fixture = testing::Fixture::new().await;

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = fixture.conversations.clone();
                let (a, b) = if i % 2 == 0 {
                    (fixture.alice, fixture.bob)
                } else {
                    (fixture.bob, fixture.alice)
                };
                tokio::spawn(async move { store.find_or_create(a, b).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&fixture.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rejects_self_and_unknown_participants() {
        let fixture = testing::Fixture::new().await;
        let stranger = UserId::new();
        let mallory = testing::blocked_user(&fixture.db_pool).await;

        assert!(matches!(
            fixture.conversations.find_or_create(fixture.alice, fixture.alice).await,
            Err(AppError::SelfConversation)
        ));
        assert!(matches!(
            fixture.conversations.find_or_create(fixture.alice, stranger).await,
            Err(AppError::InvalidParticipant(id)) if id == stranger
        ));
        assert!(matches!(
            fixture.conversations.find_or_create(mallory, fixture.bob).await,
            Err(AppError::InvalidParticipant(id)) if id == mallory
        ));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&fixture.db_pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn stale_touch_is_ignored() {
        let fixture = testing::Fixture::new().await;
        let older = fixture.send_text("first").await;
        let newer = fixture.send_text("second").await;
        let id = older.conversation_id;

        assert!(!fixture.conversations.touch(id, &older).await.unwrap());
        let conversation = fixture.conversations.get(id).await.unwrap();
        assert_eq!(conversation.last_message_id, Some(newer.id));
        assert!(conversation.updated_at >= newer.created_at);
    }

    #[tokio::test]
    async fn lists_most_recent_activity_first_across_pages() {
        let fixture = testing::Fixture::new().await;
        let carol = testing::user(&fixture.db_pool).await;
        let dave = testing::user(&fixture.db_pool).await;

        let mut expected = Vec::new();
        for peer in [fixture.bob, carol, dave] {
            let conversation = fixture.conversations.find_or_create(fixture.alice, peer).await.unwrap();
            let message = fixture
                .messages
                .append(conversation.id, fixture.alice, Payload::text("hey").unwrap())
                .await
                .unwrap();
            fixture.conversations.touch(conversation.id, &message).await.unwrap();
            expected.insert(0, conversation.id);
        }

        let first = fixture
            .conversations
            .list_for_user(fixture.alice, &PageRequest::first(2), 2)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.next_cursor.expect("second page");

        let second = fixture
            .conversations
            .list_for_user(fixture.alice, &PageRequest::after(cursor, 2), 2)
            .await
            .unwrap();
        assert!(second.next_cursor.is_none());

        let listed: Vec<_> = first.items.iter().chain(&second.items).map(|c| c.id).collect();
        assert_eq!(listed, expected);

        let streamed: Vec<_> = fixture
            .conversations
            .stream_for_user(fixture.alice, 1)
            .map_ok(|c| c.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed, expected);

        let bobs = fixture
            .conversations
            .list_for_user(fixture.bob, &PageRequest::default(), 10)
            .await
            .unwrap();
        assert_eq!(bobs.items.len(), 1);
    }
}
