use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    conversations::Conversation,
    ids::{ConversationId, UserId},
    messages::Message,
    page::{Page, PageRequest},
    AppResult, AppState, Messenger,
};

use super::actor::Actor;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list).post(open))
        .route("/conversations/{id}/messages", get(history))
        .route("/conversations/{id}/read", post(mark_read))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpenConversation {
    peer_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkedRead {
    updated: usize,
}

#[debug_handler(state = AppState)]
pub(crate) async fn open(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Json(OpenConversation { peer_id }): Json<OpenConversation>,
) -> AppResult<Json<Conversation>> {
    Ok(Json(messenger.open_conversation(user_id, peer_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Query(request): Query<PageRequest>,
) -> AppResult<Json<Page<Conversation>>> {
    Ok(Json(messenger.conversations(user_id, &request).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Path(conversation_id): Path<ConversationId>,
    Query(request): Query<PageRequest>,
) -> AppResult<Json<Page<Message>>> {
    Ok(Json(messenger.history(user_id, conversation_id, &request).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn mark_read(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Path(conversation_id): Path<ConversationId>,
) -> AppResult<Json<MarkedRead>> {
    let updated = messenger.mark_conversation_read(user_id, conversation_id).await?;
    Ok(Json(MarkedRead { updated }))
}
