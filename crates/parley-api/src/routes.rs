use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;
use crate::{conversations, messages};

/// Every conversation route, behind bearer auth.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/read",
            post(messages::mark_read),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
