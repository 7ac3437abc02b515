use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    config::DatabaseConfig,
    conversations::{Conversation, ConversationStore},
    db::{self, RetryPolicy},
    directory::SqliteDirectory,
    ids::UserId,
    messages::{Message, MessageStore, Payload},
};

pub(crate) async fn pool() -> SqlitePool {
    let db_pool = db::connect(&DatabaseConfig::in_memory()).await.unwrap();
    db::migrate(&db_pool).await.unwrap();
    db_pool
}

async fn insert_user(db_pool: &SqlitePool, is_blocked: bool) -> UserId {
    let id = UserId::new();
    sqlx::query("INSERT INTO users (id, is_blocked) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(is_blocked)
        .execute(db_pool)
        .await
        .unwrap();
    id
}

pub(crate) async fn user(db_pool: &SqlitePool) -> UserId {
    insert_user(db_pool, false).await
}

pub(crate) async fn blocked_user(db_pool: &SqlitePool) -> UserId {
    insert_user(db_pool, true).await
}

/// Two registered users and the stores wired over one in-memory database.
pub(crate) struct Fixture {
    pub db_pool: SqlitePool,
    pub alice: UserId,
    pub bob: UserId,
    pub conversations: ConversationStore,
    pub messages: MessageStore,
}

impl Fixture {
    pub async fn new() -> Self {
        let db_pool = pool().await;
        let alice = user(&db_pool).await;
        let bob = user(&db_pool).await;

        let retry = RetryPolicy::default();
        let conversations =
            ConversationStore::new(db_pool.clone(), Arc::new(SqliteDirectory::new(db_pool.clone())), retry);
        let messages = MessageStore::new(db_pool.clone(), conversations.clone(), retry);

        Self { db_pool, alice, bob, conversations, messages }
    }

    pub async fn conversation(&self) -> Conversation {
        self.conversations.find_or_create(self.alice, self.bob).await.unwrap()
    }

    /// Alice to Bob, with the conversation pointer moved like a real send.
    pub async fn send_text(&self, text: &str) -> Message {
        let conversation = self.conversation().await;
        let message = self
            .messages
            .append(conversation.id, self.alice, Payload::text(text).unwrap())
            .await
            .unwrap();
        self.conversations.touch(conversation.id, &message).await.unwrap();
        message
    }
}
