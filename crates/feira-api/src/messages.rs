use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use feira_gateway::router::ReadReceipt;
use feira_types::api::MarkReadResponse;
use feira_types::models::Message;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// A single message, visible to its sender and receiver only.
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .with_db(move |db| db.get_message_by_id(message_id))
        .await?
        .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
        .ok_or(ApiError::NotFound)?;
    Ok(Json(message))
}

/// Same path as the `messageRead` WebSocket command, so live senders are
/// notified either way.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let receipt = state.gateway.router().mark_read(&user_id, message_id).await?;
    Ok(Json(MarkReadResponse {
        message_id,
        transitioned: receipt == ReadReceipt::Transitioned,
    }))
}
