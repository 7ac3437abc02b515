use std::sync::Arc;

use serde::Serialize;

use crate::{
    directory::IdentityDirectory,
    ids::{ConversationId, MessageId, UserId},
    messages::{Message, MessageKind},
};

/// What a push notification needs to say about a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub summary: String,
}

impl From<&Message> for MessagePreview {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id: message.sender_id,
            kind: message.payload.kind(),
            summary: message.payload.summary(),
        }
    }
}

/// Hands a notification to whatever delivers pushes. Must not block; the
/// result is never observed by the caller.
pub trait PushNotifier: Send + Sync {
    fn notify(&self, user_id: UserId, preview: MessagePreview);
}

/// Only records that a push would have been sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl PushNotifier for LogNotifier {
    fn notify(&self, user_id: UserId, preview: MessagePreview) {
        tracing::info!(
            %user_id,
            message_id = %preview.message_id,
            kind = %preview.kind,
            "push notification requested"
        );
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    user_id: UserId,
    token: &'a str,
    preview: &'a MessagePreview,
}

/// POSTs each notification to an external dispatcher, addressed to the
/// user's recorded device token. Users without a token are skipped.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    directory: Arc<dyn IdentityDirectory>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            directory,
        }
    }

    async fn deliver(&self, user_id: UserId, preview: MessagePreview) -> anyhow::Result<()> {
        let Some(token) = self.directory.push_token(user_id).await? else {
            tracing::debug!(%user_id, "no push token, notification skipped");
            return Ok(());
        };

        self.client
            .post(&self.url)
            .json(&WebhookBody { user_id, token: &token, preview: &preview })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl PushNotifier for WebhookNotifier {
    fn notify(&self, user_id: UserId, preview: MessagePreview) {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.deliver(user_id, preview).await {
                tracing::warn!(%user_id, error = %err, "push webhook failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Payload;

    #[test]
    fn preview_summarises_the_payload() {
        let message = Message::detached(Payload::media(MessageKind::File, "https://cdn/a.pdf").unwrap());
        let preview = MessagePreview::from(&message);

        assert_eq!(preview.message_id, message.id);
        assert_eq!(preview.kind, MessageKind::File);
        assert_eq!(preview.summary, "Sent a file");

        let json = serde_json::to_value(&preview).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["senderId"], message.sender_id.to_string());
    }
}
