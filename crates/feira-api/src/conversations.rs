use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use feira_types::api::UnreadCountResponse;
use feira_types::models::{Conversation, Message};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message of the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// The caller's inbox, one entry per counterpart, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state
        .with_db(move |db| db.list_conversations_for(&user_id))
        .await?;
    Ok(Json(conversations))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(counterpart_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let messages = state
        .with_db(move |db| db.get_messages_between(&user_id, &counterpart_id, limit, query.before))
        .await?;
    Ok(Json(messages))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    Path(counterpart_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let cid = counterpart_id.clone();
    let unread_count = state
        .with_db(move |db| db.count_unread(&user_id, &cid))
        .await?;
    Ok(Json(UnreadCountResponse {
        counterpart_id,
        unread_count,
    }))
}
