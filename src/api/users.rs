use axum::{debug_handler, extract::State, http::StatusCode, routing::put, Json, Router};
use serde::Deserialize;

use crate::{AppResult, AppState, Messenger};

use super::actor::Actor;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/users/me/push-token", put(push_token))
}

#[derive(Deserialize)]
pub(crate) struct PushToken {
    /// `null` clears the token.
    token: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn push_token(
    State(messenger): State<Messenger>,
    Actor(user_id): Actor,
    Json(PushToken { token }): Json<PushToken>,
) -> AppResult<StatusCode> {
    messenger.register_push_token(user_id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}
