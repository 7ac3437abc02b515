use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    ids::{MessageId, UserId},
    messages::{Message, Payload, PayloadInput},
    AppResult, AppState, Messenger,
};

use super::actor::Actor;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send))
        .route("/messages/{id}", get(message))
        .route("/messages/{id}/delivered", post(delivered))
        .route("/messages/{id}/read", post(read))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessage {
    receiver_id: UserId,
    #[serde(flatten)]
    payload: PayloadInput,
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Json(SendMessage { receiver_id, payload }): Json<SendMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let payload = Payload::try_from(payload)?;
    let message = messenger.send_message(user_id, receiver_id, payload).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn message(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Path(message_id): Path<MessageId>,
) -> AppResult<Json<Message>> {
    Ok(Json(messenger.message(user_id, message_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delivered(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Path(message_id): Path<MessageId>,
) -> AppResult<Json<Message>> {
    Ok(Json(messenger.acknowledge_delivered(message_id, user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Path(message_id): Path<MessageId>,
) -> AppResult<Json<Message>> {
    Ok(Json(messenger.acknowledge_read(message_id, user_id).await?))
}
