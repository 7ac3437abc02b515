use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::unbounded_channel;

use crate::{
    ids::{ConnectionId, ConversationId, MessageId, UserId},
    messages::{Message, MessageKind, Payload},
    AppError, AppResult, AppState, Messenger,
};

use super::actor::Actor;

/// Frames a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub(crate) enum ClientFrame {
    JoinRoom {
        conversation_id: ConversationId,
    },
    SendMessage {
        receiver_id: UserId,
        kind: MessageKind,
        #[serde(default, alias = "body")]
        text: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
    },
    AckDelivered {
        message_id: MessageId,
    },
    AckRead {
        message_id: MessageId,
    },
}

/// Direct answers to the client's own frames. Room events travel separately.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub(crate) enum Reply {
    MessageSent { message: Message },
    Error { message: String },
}

#[debug_handler(state = AppState)]
pub(crate) async fn socket(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve(messenger, user_id, stream))
}

async fn serve(messenger: Messenger, user_id: UserId, stream: WebSocket) {
    let (connection_id, mut events) = messenger.connect(user_id).await;
    let (replies_tx, mut replies) = unbounded_channel::<Reply>();
    let (mut sender, mut receiver) = stream.split();

    let mut forward_task = tokio::spawn(async move {
        loop {
            let encoded = tokio::select! {
                Some(event) = events.recv() => serde_json::to_string(&event),
                Some(reply) = replies.recv() => serde_json::to_string(&reply),
                else => break,
            };

            let Ok(text) = encoded else {
                continue;
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = &mut forward_task => break,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };

        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(frame) => handle(&messenger, connection_id, user_id, frame)
                .await
                .unwrap_or_else(|err| Some(error_reply(connection_id, err))),
            Err(err) => Some(Reply::Error { message: format!("malformed frame: {err}") }),
        };

        if let Some(reply) = reply {
            if replies_tx.send(reply).is_err() {
                break;
            }
        }
    }

    forward_task.abort();
    messenger.disconnect(connection_id).await;
    tracing::debug!(%connection_id, %user_id, "socket closed");
}

fn error_reply(connection_id: ConnectionId, err: AppError) -> Reply {
    if err.status_code().is_server_error() {
        tracing::error!(%connection_id, error = %err, "socket frame failed");
    }
    Reply::Error { message: err.public_message() }
}

async fn handle(
    messenger: &Messenger,
    connection_id: ConnectionId,
    user_id: UserId,
    frame: ClientFrame,
) -> AppResult<Option<Reply>> {
    match frame {
        ClientFrame::JoinRoom { conversation_id } => {
            messenger.join_room(connection_id, conversation_id).await?;
            Ok(None)
        }
        ClientFrame::SendMessage { receiver_id, kind, text, media_url } => {
            let payload = Payload::from_parts(kind, text, media_url)?;
            let message = messenger.send_message(user_id, receiver_id, payload).await?;
            Ok(Some(Reply::MessageSent { message }))
        }
        ClientFrame::AckDelivered { message_id } => {
            messenger.acknowledge_delivered(message_id, user_id).await?;
            Ok(None)
        }
        ClientFrame::AckRead { message_id } => {
            messenger.acknowledge_read(message_id, user_id).await?;
            Ok(None)
        }
    }
}
