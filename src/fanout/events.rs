use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    ids::{ConversationId, MessageId, UserId},
    messages::{Message, MessageKind},
    status::{DeliveryStatus, StatusChange},
};

/// Events pushed to the members of a conversation room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    NewMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        sender_id: UserId,
        kind: MessageKind,
        /// Text body, or the media locator for non-text kinds.
        body: String,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        message_id: MessageId,
        new_status: DeliveryStatus,
    },
}

impl From<&Message> for RoomEvent {
    fn from(message: &Message) -> Self {
        RoomEvent::NewMessage {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id: message.sender_id,
            kind: message.payload.kind(),
            body: message.payload.body().to_owned(),
            timestamp: message.created_at,
        }
    }
}

impl From<&StatusChange> for RoomEvent {
    fn from(change: &StatusChange) -> Self {
        RoomEvent::StatusChanged {
            message_id: change.message_id,
            new_status: change.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_wire_shape() {
        let message_id = MessageId::new();
        let event = RoomEvent::StatusChanged { message_id, new_status: DeliveryStatus::Read };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "statusChanged");
        assert_eq!(json["messageId"], message_id.to_string());
        assert_eq!(json["newStatus"], "read");
    }
}
