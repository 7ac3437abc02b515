mod actor;
mod conversations;
mod messages;
mod users;
mod ws;

use axum::{debug_handler, extract::State, http::StatusCode, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{db, AppResult, AppState};

pub use actor::{Actor, USER_ID_HEADER};

/// The JSON surface, mounted under `/api` by [`app`].
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(conversations::router())
        .merge(messages::router())
        .merge(users::router())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::socket))
        .nest("/api", router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[debug_handler(state = AppState)]
async fn health(State(db_pool): State<SqlitePool>) -> AppResult<StatusCode> {
    db::ping(&db_pool).await?;
    Ok(StatusCode::OK)
}
