use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    config::Config,
    conversations::{Conversation, ConversationStore},
    db::RetryPolicy,
    directory::IdentityDirectory,
    fanout::{Departure, FanoutRouter, RoomEvent, Sequencer},
    ids::{ConnectionId, ConversationId, MessageId, UserId},
    messages::{Message, MessageStore, Payload},
    page::{Page, PageRequest},
    push::{MessagePreview, PushNotifier},
    status::{DeliveryStatus, StatusEngine},
    AppError, AppResult,
};

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: u32,
    pub max: u32,
}

impl From<&Config> for PageLimits {
    fn from(config: &Config) -> Self {
        Self { default: config.page_limit_default, max: config.page_limit_max }
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { default: 50, max: 200 }
    }
}

/// Entry point for the HTTP handlers and the websocket transport.
#[derive(Clone)]
pub struct Messenger {
    conversations: ConversationStore,
    messages: MessageStore,
    statuses: StatusEngine,
    router: Arc<FanoutRouter>,
    sequencer: Sequencer,
    notifier: Arc<dyn PushNotifier>,
    directory: Arc<dyn IdentityDirectory>,
    limits: PageLimits,
}

impl Messenger {
    pub fn new(
        db_pool: SqlitePool,
        directory: Arc<dyn IdentityDirectory>,
        router: Arc<FanoutRouter>,
        notifier: Arc<dyn PushNotifier>,
        retry: RetryPolicy,
        limits: PageLimits,
    ) -> Self {
        let conversations = ConversationStore::new(db_pool.clone(), directory.clone(), retry);
        let messages = MessageStore::new(db_pool.clone(), conversations.clone(), retry);
        let statuses = StatusEngine::new(db_pool, retry);

        Self {
            conversations,
            messages,
            statuses,
            router,
            sequencer: Sequencer::new(),
            notifier,
            directory,
            limits,
        }
    }

    pub fn router(&self) -> &FanoutRouter {
        &self.router
    }

    pub async fn open_conversation(&self, by: UserId, peer: UserId) -> AppResult<Conversation> {
        self.conversations.find_or_create(by, peer).await
    }

    pub async fn conversations(&self, by: UserId, request: &PageRequest) -> AppResult<Page<Conversation>> {
        let limit = request.limit(self.limits.default, self.limits.max);
        self.conversations.list_for_user(by, request, limit).await
    }

    pub async fn history(
        &self,
        by: UserId,
        conversation_id: ConversationId,
        request: &PageRequest,
    ) -> AppResult<Page<Message>> {
        self.participant_conversation(by, conversation_id).await?;

        let limit = request.limit(self.limits.default, self.limits.max);
        self.messages.list_for_conversation(conversation_id, request, limit).await
    }

    pub async fn message(&self, by: UserId, message_id: MessageId) -> AppResult<Message> {
        let message = self.messages.get(message_id).await?;
        if message.sender_id != by && message.receiver_id != by {
            return Err(AppError::NotAuthorized);
        }
        Ok(message)
    }

    /// Stores the message, then pushes it to the room. Once stored, the rest
    /// runs on its own task so a caller that goes away cannot cut it short.
    /// The conversation's turn is held until the publish is done.
    pub async fn send_message(&self, sender: UserId, receiver: UserId, payload: Payload) -> AppResult<Message> {
        let conversation = self.conversations.find_or_create(sender, receiver).await?;
        let turn = self.sequencer.enter(conversation.id).await;
        let message = self.messages.append(conversation.id, sender, payload).await?;

        let this = self.clone();
        let stored = message.clone();
        let fanout = tokio::spawn(async move {
            this.after_append(&stored).await;
            drop(turn);
        });
        if let Err(err) = fanout.await {
            tracing::error!(message_id = %message.id, error = %err, "fanout task failed");
        }

        Ok(message)
    }

    async fn after_append(&self, message: &Message) {
        if let Err(err) = self.conversations.touch(message.conversation_id, message).await {
            tracing::warn!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                error = %err,
                "failed to move last message pointer"
            );
        }

        let report = self.router.publish(message.conversation_id, RoomEvent::from(message)).await;
        tracing::debug!(
            message_id = %message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "new message published"
        );

        if !report.reached(message.receiver_id) {
            self.notifier.notify(message.receiver_id, MessagePreview::from(message));
        }
    }

    pub async fn acknowledge_delivered(&self, message_id: MessageId, by: UserId) -> AppResult<Message> {
        self.acknowledge(message_id, by, DeliveryStatus::Delivered).await
    }

    pub async fn acknowledge_read(&self, message_id: MessageId, by: UserId) -> AppResult<Message> {
        self.acknowledge(message_id, by, DeliveryStatus::Read).await
    }

    async fn acknowledge(&self, message_id: MessageId, by: UserId, target: DeliveryStatus) -> AppResult<Message> {
        let mut message = self.messages.get(message_id).await?;
        if message.receiver_id != by {
            return Err(AppError::NotAuthorized);
        }

        let _turn = self.sequencer.enter(message.conversation_id).await;
        match self.statuses.advance(message_id, target).await? {
            Some(change) => {
                self.router.publish(change.conversation_id, RoomEvent::from(&change)).await;
                message.status = change.status;
                Ok(message)
            }
            // someone else moved it; hand back what is stored now
            None => self.messages.get(message_id).await,
        }
    }

    /// Marks everything `by` received in the conversation as read. Returns
    /// how many messages changed.
    pub async fn mark_conversation_read(&self, by: UserId, conversation_id: ConversationId) -> AppResult<usize> {
        self.participant_conversation(by, conversation_id).await?;

        let _turn = self.sequencer.enter(conversation_id).await;
        let changes = self
            .statuses
            .advance_conversation(conversation_id, by, DeliveryStatus::Read)
            .await?;
        for change in &changes {
            self.router.publish(conversation_id, RoomEvent::from(change)).await;
        }

        Ok(changes.len())
    }

    pub async fn connect(&self, user_id: UserId) -> (ConnectionId, UnboundedReceiver<RoomEvent>) {
        self.router.connect(user_id).await
    }

    /// Subscribes the connection to a conversation's room. An unknown
    /// conversation is logged and ignored.
    pub async fn join_room(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> AppResult<bool> {
        match self.conversations.get(conversation_id).await {
            Ok(_) => Ok(self.router.join(connection_id, conversation_id).await),
            Err(AppError::ConversationNotFound(_)) => {
                tracing::warn!(%connection_id, %conversation_id, "join for unknown conversation ignored");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<Departure> {
        self.router.leave(connection_id).await
    }

    pub async fn register_push_token(&self, user_id: UserId, token: Option<String>) -> AppResult<()> {
        let token = token.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty());
        self.directory.record_push_token(user_id, token).await
    }

    async fn participant_conversation(&self, by: UserId, conversation_id: ConversationId) -> AppResult<Conversation> {
        let conversation = self.conversations.get(conversation_id).await?;
        if !conversation.has_participant(by) {
            return Err(AppError::NotAuthorized);
        }
        Ok(conversation)
    }
}
