use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use eduflow_db::models::MessageRow;
use eduflow_gateway::identity::UserIdentity;
use eduflow_types::api::MessageResponse;

use crate::auth::AppState;

pub const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message from the previous page.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

pub(crate) fn message_response(row: MessageRow) -> MessageResponse {
    // Rows written before names were stored carry an empty name
    let sender_name = if row.sender_name.is_empty() {
        format!("User {}", row.sender_id)
    } else {
        row.sender_name
    };

    MessageResponse {
        id: row.id,
        room_id: row.room_id,
        sender_id: row.sender_id,
        sender_name,
        content: row.content,
        file_url: row.file_url,
        file_type: row.file_type,
        timestamp: row.created_at,
        is_system_message: row.is_system_message,
        is_read: row.is_read,
    }
}

/// Chronological history. Non-members get an empty list, not an error.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<MessageQuery>,
    Extension(user): Extension<UserIdentity>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before;

    let rows = state
        .storage(move |db| {
            if !db.is_member(user.tenant_id, room_id, user.user_id)? {
                return Ok(Vec::new());
            }
            db.list_messages(user.tenant_id, room_id, limit, before)
        })
        .await?;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}
