pub mod auth;
pub mod cache;
mod convert;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod pagination;
pub mod users;

use axum::{
    Json, Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use serde_json::json;
use tracing::error;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

/// Every route of the HTTP API. Everything except `/auth/*` and `/health`
/// requires a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/me", get(users::me).delete(users::delete_me))
        .route("/users/search", get(users::search_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/messages", get(messages::list_messages).post(messages::send_message))
        .route("/messages/inbox", get(messages::inbox))
        .route("/messages/with/{partner_id}", get(messages::conversation_with))
        .route(
            "/messages/{message_id}",
            get(messages::get_message)
                .patch(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route(
            "/messages/{message_id}/replies",
            get(messages::list_replies).post(messages::reply),
        )
        .route("/messages/{message_id}/thread", get(messages::get_thread))
        .route("/messages/{message_id}/history", get(messages::get_history))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/participants",
            post(conversations::add_participant),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::conversation_messages),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(from_fn(middleware::log_requests))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Run blocking database work off the async runtime.
pub(crate) async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
}
