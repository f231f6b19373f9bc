pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;

#[cfg(test)]
mod test_support;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use state::{AppState, AppStateInner};

/// Re-fetch routes. Every route requires a bearer token.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{counterpart_id}/messages",
            get(conversations::get_history),
        )
        .route(
            "/conversations/{counterpart_id}/unread",
            get(conversations::get_unread_count),
        )
        .route("/messages/{message_id}", get(messages::get_message))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
